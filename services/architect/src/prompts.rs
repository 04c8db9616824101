//! System instructions and content templates for the six operations
//!
//! The feature group table mirrors the toggles on the configuration screen;
//! strategy analysis hands it to the model so suggested settings use the
//! same names.

use serde_json::{Map, Value, json};

/// Feature toggles per settings group.
pub const FEATURE_GROUPS: &[(&str, &[&str])] = &[
    ("general", &["useMagicNumber", "useComment", "useSlippage", "useMaxSpread", "useOrderFilling", "enableBuy", "enableSell"]),
    ("money", &["useFixedLot", "useAutoLot", "useMaxLot", "useMinLot", "useLotStep"]),
    ("sltp", &["useStopLoss", "useTakeProfit", "useVirtual", "useAtr", "useCandleBased"]),
    ("trailing", &["useBreakeven", "useTrailing", "useIndicatorTrailing"]),
    ("grid", &["enabled", "useMaxOrders", "useDistance", "useStepMultiplier", "useLotMultiplier", "useBasketTP", "useDrawdownReducer"]),
    ("time", &["useTimeFilter", "useWeekendFilter", "useNewsFilter", "useAutoGmt"]),
    ("protection", &["useDailyLoss", "useMaxDrawdown", "useTargetProfit", "useEquityStop", "useEquityTrailing"]),
    ("display", &["usePanel", "usePush", "useEmail", "useSound"]),
    ("advanced", &["useOneChart", "useRecovery", "usePartialClose"]),
    ("stealth", &["useRandomDelay", "useVirtualPending", "useMaxOrdersPerCandle", "useRetryAttempts", "useSlippageControl"]),
    ("pending", &["usePendingOrder", "usePendingDistance", "useExpiration", "useFollowPrice", "useDeleteOpposite"]),
    ("timeExit", &["useMaxDuration", "useFridayClose", "useRolloverClose", "useNewCandleClose"]),
    ("volatility", &["useMaxCandleSize", "useMinCandleSize", "useGapProtection", "useAvgSpread"]),
    ("customIndi", &["useCustomIndicator", "useBufferLogic", "useStringParams"]),
    ("propFirm", &["useDailyLossReset", "useConsistency", "useHardNewsBlock", "useHedgingCheck"]),
    ("remote", &["useTelegram", "useScreenshots", "useCommands"]),
    ("recovery", &["useZoneRecovery", "useRecoveryGap", "useRecoveryTP", "usePartialCloseLoss", "useDoubleLotOnLoss"]),
    ("gui", &["useDarkTheme", "useButtonPos", "useDrawLines", "useCurrencyChoice"]),
    ("correlation", &["useCorrelationCheck", "useMaxExposure", "useMaxUsdLots", "useSymbolPrefixSuffix"]),
    ("aiml", &["useOnnxModel", "useConfidenceThreshold", "useDataNormalization", "useRetrainingMode"]),
    ("swap", &["useTotalCostCheck", "useTripleSwapFilter", "usePositiveSwapOnly", "useMinProfitCover"]),
    ("breakout", &["useAsianBox", "useLondonOffset", "useBoxBuffer", "useNfpFilter"]),
    ("advGrid", &["useGridReset", "useTrendGrid", "useAtrGridDistance", "useHedgingGrid", "useSmartGrid"]),
    ("logs", &["useFileLogging", "useScreenshotOnError", "useDebugMode"]),
    ("license", &["useLicenseKey", "useAccountList", "useExpirationDate", "useTrialMode", "useBrokerFilter"]),
    ("advNews", &["useWebRequest", "useKeywordFilter", "useCurrencyFilter", "useNewsAutoUpdate"]),
    ("visuals", &["useCustomFont", "useButtonOpacity", "useProfitLineStyle"]),
    ("sessions", &["useAsianSession", "useLondonSession", "useNewYorkSession", "useSessionOffsets"]),
];

/// `FEATURE_GROUPS` as a JSON object of group name to flag list.
pub fn feature_groups_json() -> Value {
    let groups: Map<String, Value> = FEATURE_GROUPS
        .iter()
        .map(|(group, flags)| (group.to_string(), json!(flags)))
        .collect();
    Value::Object(groups)
}

const ANALYZE_INSTRUCTION: &str = r#"You are a quantitative strategist and architect of automated trading systems.

Task:
1. Read the user's strategy description.
2. Match it against the available feature list below.
3. Return JSON with:
   - "settings": the features to enable (true), grouped as in the list, plus symbol and timeframe when stated.
   - "reasoning": a detailed explanation of why each feature was enabled or suggested.

Rules:
- Scalping strategies are spread and slippage sensitive: enable stealth.useSlippageControl and volatility.useAvgSpread.
- Martingale strategies must enable protection.useMaxDrawdown and advGrid.useGridReset as account safeguards.
- Identify the traded symbol and timeframe precisely.

Example output:
{
  "settings": {
    "symbol": "XAUUSD",
    "timeframe": "M5",
    "grid": { "enabled": true, "useLotMultiplier": true },
    "protection": { "useMaxDrawdown": true }
  },
  "reasoning": "Martingale on gold at M5 needs strict risk control, so Max Drawdown and Grid Reset are enabled."
}

Available features:
"#;

/// Strategy analysis instruction with the feature table appended.
pub fn analyze_instruction() -> String {
    let groups = serde_json::to_string_pretty(&feature_groups_json()).unwrap_or_default();
    format!("{ANALYZE_INSTRUCTION}{groups}")
}

pub fn analyze_content(description: &str) -> String {
    format!("Analyze and configure the trading system for this description:\n\n\"{description}\"")
}

pub const CONSULT_INSTRUCTION: &str = r#"You are a Forex and Expert Advisor consultant who interviews the user step by step.

Goal: lead the user from a rough idea to a complete strategy by asking ONE question at a time.

Format every reply as:

✅ **Summary**: the parameters agreed so far, as a list.
🧐 **Current analysis**: the missing piece (entry, exit or money management).
❓ **Next question**: exactly one question about the most important gap.
💡 **Suggestions**: concrete options A, B, C with numbers, e.g. "SL 500 points or 300 points?"

Use markdown lists and indentation. Be friendly and professional."#;

pub const SPEC_INSTRUCTION: &str = r#"You are the chief strategy officer of a quantitative hedge fund.
Turn the raw configuration into an institutional-grade technical specification.

1. prompt: a software requirements specification for an MQL5 Expert Advisor. Be precise about the math (lot sizing formulas, ATR-based grid distance). Separate input parameters, entry logic, exit logic, risk management and error handling.
2. score: 0-100 rating of edge, risk/reward and robustness.
3. analysis: an auditor's review listing edge cases that could blow the account and concrete parameter improvements.
4. title: a professional, distinctive strategy name.

Show a deep understanding of market structure and risk management."#;

pub fn spec_content(settings: &Value) -> String {
    let config = serde_json::to_string_pretty(settings).unwrap_or_default();
    format!("Create the specification and review for this configuration:\n\n{config}")
}

/// Response schema for specification generation.
pub fn spec_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "prompt": { "type": "STRING", "description": "Complete MQL5 requirements specification (Markdown)." },
            "score": { "type": "INTEGER", "description": "Quality score 0-100." },
            "analysis": { "type": "STRING", "description": "Strengths and weaknesses (Markdown)." },
            "title": { "type": "STRING", "description": "Strategy name." }
        },
        "required": ["prompt", "score", "analysis", "title"]
    })
}

pub const CODE_INSTRUCTION: &str = r#"You are a senior quantitative developer and MQL5 systems engineer.

Task: develop a production-grade MetaTrader 5 Expert Advisor (.mq5).

Engineering standards:
1. Architecture: clean, modular structure; object-oriented where it helps.
2. Trade execution: use <Trade/Trade.mqh>; check return codes (TRADE_RETCODE_DONE), slippage and spread filters, StopLevel and FreezeLevel.
3. Risk engine: hard safety limits (max drawdown, daily loss) as the specification requests.
4. Performance: optimized for backtesting speed.
5. Reliability: reconnect logic, error logging, graceful handling of requotes and busy server errors.
6. Code quality: consistent indentation, meaningful names, thorough comments.

Output: ONLY the raw MQL5 code. No explanations, no markdown wrappers."#;

pub fn code_content(spec: &str) -> String {
    format!("Generate MQL5 Code for this specification:\n\n{spec}")
}

pub const FIX_INSTRUCTION: &str = r#"You are an expert MQL5 debugger.

Task: analyze the MQL5 source code and the MetaEditor compiler log. Fix ALL errors and warnings and return the fully corrected source.

Output: ONLY the corrected raw MQL5 code. Do not wrap it in markdown blocks."#;

pub fn fix_content(code: &str, error_log: &str) -> String {
    format!("Fix this code based on the errors:\n\nERROR LOG:\n{error_log}\n\nSOURCE CODE:\n{code}")
}

const SIMULATE_INSTRUCTION: &str = r#"You are an algorithm auditor and QA engineer.

Task: perform white-box testing and a logic simulation of the MQL5 code against its technical specification for the symbol {symbol}.

Report structure (Markdown):

## 1. Logic verification
* Order flow: how the EA detects signals and executes orders.
* Risk handling: whether stop loss and money management work as designed.

## 2. Audit report
🔍 **Accuracy**: [✅ PASS / ⚠️ WARN / ❌ FAIL] code logic against the specification's formulas.
🛡️ **Robustness**: [✅ PASS / ⚠️ WARN / ❌ FAIL] server errors, spread widening, slippage.
📈 **Performance**: [✅ PASS / ⚠️ WARN / ❌ FAIL] execution latency and loop efficiency.

## 3. Technical recommendations
Concrete improvements to reach institutional grade."#;

pub fn simulate_instruction(symbol: &str) -> String {
    SIMULATE_INSTRUCTION.replace("{symbol}", symbol)
}

pub fn simulate_content(spec: &str, code: &str, symbol: &str) -> String {
    format!("ORIGINAL SPECIFICATION:\n{spec}\n\nSYMBOL: {symbol}\n\nSOURCE CODE:\n{code}")
}

/// Reasoning used when the model returns settings without an explanation.
pub const DEFAULT_REASONING: &str =
    "The configuration was analyzed and optimized based on your description.";

/// Reply used when the consultant returns no text.
pub const EMPTY_CONSULT_REPLY: &str = "Sorry, I need a moment to think. Could you ask again?";

/// Placeholder code when generation returns no text.
pub const EMPTY_CODE: &str = "// Error generating code.";

/// Report used when the simulation returns no text.
pub const EMPTY_SIMULATION: &str = "Simulation failed.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_groups_cover_every_settings_section() {
        let groups = feature_groups_json();
        let object = groups.as_object().unwrap();
        assert_eq!(object.len(), FEATURE_GROUPS.len());
        assert_eq!(object["grid"][0], "enabled");
        assert!(
            object["advGrid"]
                .as_array()
                .unwrap()
                .contains(&json!("useGridReset"))
        );
    }

    #[test]
    fn analyze_instruction_embeds_feature_table() {
        let instruction = analyze_instruction();
        assert!(instruction.contains("\"useSlippageControl\""));
        assert!(instruction.contains("\"sessions\""));
    }

    #[test]
    fn simulate_instruction_names_symbol() {
        let instruction = simulate_instruction("XAUUSD");
        assert!(instruction.contains("for the symbol XAUUSD"));
        assert!(!instruction.contains("{symbol}"));
    }

    #[test]
    fn spec_schema_requires_all_fields() {
        let schema = spec_schema();
        assert_eq!(schema["required"], json!(["prompt", "score", "analysis", "title"]));
        assert_eq!(schema["properties"]["score"]["type"], "INTEGER");
    }

    #[test]
    fn fix_content_puts_log_before_code() {
        let content = fix_content("int x", "error 101");
        let log_at = content.find("error 101").unwrap();
        let code_at = content.find("int x").unwrap();
        assert!(log_at < code_at);
    }
}
