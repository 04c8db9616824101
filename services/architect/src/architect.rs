//! The six model-backed operations
//!
//! Each operation resolves a model from the stored preference, builds one
//! `CompletionRequest` and runs it through the rotating client. Failures
//! surface as `Error`; nothing is turned into placeholder success text
//! except the documented empty-reply defaults.

use std::sync::Arc;

use completion::{CompletionError, CompletionRequest, CompletionService, Role, Turn};
use key_pool::{
    DEBUG_MODEL, FAST_MODEL, ModelPreference, ModelSelection, RotatingClient, TaskWeight,
};
use key_store::KvStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::prompts;

/// Reasoning budget for code generation on pro-tier models.
const CODE_THINKING_BUDGET: u32 = 16000;

/// Reasoning budget for repair and simulation on pro-tier models.
const REVIEW_THINKING_BUDGET: u32 = 8192;

/// Settings suggested for a free-text strategy description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAnalysis {
    pub settings: Value,
    pub reasoning: String,
}

impl StrategyAnalysis {
    fn empty() -> Self {
        Self {
            settings: Value::Object(Default::default()),
            reasoning: String::new(),
        }
    }
}

/// One message of the consultant conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: u64,
}

/// Specification, score and review produced from a settings object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub prompt: String,
    pub score: i64,
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub struct Architect {
    client: RotatingClient,
    service: Arc<dyn CompletionService>,
    store: Arc<KvStore>,
}

impl Architect {
    pub fn new(
        client: RotatingClient,
        service: Arc<dyn CompletionService>,
        store: Arc<KvStore>,
    ) -> Self {
        Self {
            client,
            service,
            store,
        }
    }

    /// Current model selection, rejected early when a custom model is blank.
    async fn selection(&self) -> Result<ModelSelection> {
        let selection = ModelSelection::load(&self.store).await;
        selection.ensure_ready()?;
        Ok(selection)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self.client.complete(self.service.as_ref(), request).await?;
        Ok(response.text)
    }

    /// Suggest feature toggles for a strategy description.
    ///
    /// A blank description returns empty settings without calling the model.
    #[instrument(skip_all, fields(chars = description.len()))]
    pub async fn analyze_strategy(&self, description: &str) -> Result<StrategyAnalysis> {
        if description.trim().is_empty() {
            return Ok(StrategyAnalysis::empty());
        }
        let model = self.selection().await?.resolve(TaskWeight::Light);
        let request = CompletionRequest::new(
            model,
            prompts::analyze_instruction(),
            prompts::analyze_content(description),
        )
        .json();

        let text = self.complete(&request).await?;
        if text.trim().is_empty() {
            return Ok(StrategyAnalysis::empty());
        }
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| Error::InvalidResponse(format!("analysis is not JSON: {e}")))?;

        let settings = match parsed.get("settings") {
            Some(s) if s.is_object() => s.clone(),
            _ => Value::Object(Default::default()),
        };
        let reasoning = parsed
            .get("reasoning")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .unwrap_or(prompts::DEFAULT_REASONING)
            .to_string();
        Ok(StrategyAnalysis {
            settings,
            reasoning,
        })
    }

    /// Continue the step-by-step strategy interview.
    #[instrument(skip_all, fields(turns = history.len()))]
    pub async fn consult(&self, history: &[ChatMessage], message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::InvalidRequest("message must not be empty".into()));
        }
        let model = self.selection().await?.resolve(TaskWeight::Light);

        let mut contents: Vec<Turn> = history
            .iter()
            .map(|m| Turn {
                role: m.role,
                text: m.content.clone(),
            })
            .collect();
        contents.push(Turn::user(message));

        let request = CompletionRequest::conversation(model, prompts::CONSULT_INSTRUCTION, contents);
        let reply = self.complete(&request).await?;
        if reply.trim().is_empty() {
            return Ok(prompts::EMPTY_CONSULT_REPLY.to_string());
        }
        Ok(reply)
    }

    /// Turn a settings object into a specification with score and review.
    #[instrument(skip_all)]
    pub async fn generate_spec(&self, settings: &Value) -> Result<GenerationResult> {
        let model = self.selection().await?.resolve(TaskWeight::Light);
        let request = CompletionRequest::new(
            model,
            prompts::SPEC_INSTRUCTION,
            prompts::spec_content(settings),
        )
        .with_schema(prompts::spec_schema());

        let text = self.complete(&request).await?;
        if text.trim().is_empty() {
            return Err(Error::InvalidResponse("empty specification response".into()));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidResponse(format!("specification does not match schema: {e}")))
    }

    /// Generate MQL5 source for a specification.
    ///
    /// With the auto or pro preference the pro tier is tried first. Under
    /// auto, a quota failure on pro retries once on the fast tier with the
    /// same key before rotation sees the error.
    #[instrument(skip_all)]
    pub async fn generate_code(&self, spec: &str) -> Result<String> {
        let selection = self.selection().await?;
        let model = selection.resolve(TaskWeight::Heavy);
        let content = prompts::code_content(spec);

        let text = match selection.preference {
            ModelPreference::Fast | ModelPreference::Custom => {
                let mut request =
                    CompletionRequest::new(model, prompts::CODE_INSTRUCTION, content);
                if is_pro_tier(&request.model) {
                    request = request.with_thinking_budget(CODE_THINKING_BUDGET);
                }
                self.complete(&request).await?
            }
            ModelPreference::Auto | ModelPreference::Pro => {
                let primary =
                    CompletionRequest::new(model, prompts::CODE_INSTRUCTION, content.as_str())
                        .with_thinking_budget(CODE_THINKING_BUDGET);
                let fallback = CompletionRequest::new(FAST_MODEL, prompts::CODE_INSTRUCTION, content);
                let allow_fallback = selection.preference == ModelPreference::Auto;
                self.complete_with_fallback(&primary, &fallback, allow_fallback)
                    .await?
            }
        };

        let text = if text.is_empty() {
            prompts::EMPTY_CODE.to_string()
        } else {
            text
        };
        Ok(strip_code_fences(&text))
    }

    async fn complete_with_fallback(
        &self,
        primary: &CompletionRequest,
        fallback: &CompletionRequest,
        allow_fallback: bool,
    ) -> Result<String> {
        let service = self.service.as_ref();
        let response = self
            .client
            .execute(|credential| async move {
                match service.complete(credential.expose(), primary).await {
                    Err(e) if allow_fallback && is_pro_quota_error(&e) => {
                        warn!(
                            model = %primary.model,
                            fallback = %fallback.model,
                            error = %e,
                            "pro model out of quota, falling back"
                        );
                        service.complete(credential.expose(), fallback).await
                    }
                    other => other,
                }
            })
            .await?;
        Ok(response.text)
    }

    /// Repair MQL5 source using the compiler log.
    ///
    /// Always uses the dedicated debug model. An empty reply returns the
    /// submitted code.
    #[instrument(skip_all, fields(log_chars = error_log.len()))]
    pub async fn fix_code(&self, code: &str, error_log: &str) -> Result<String> {
        let request = CompletionRequest::new(
            DEBUG_MODEL,
            prompts::FIX_INSTRUCTION,
            prompts::fix_content(code, error_log),
        )
        .with_thinking_budget(REVIEW_THINKING_BUDGET);

        let text = self.complete(&request).await?;
        let fixed = if text.is_empty() { code } else { text.as_str() };
        Ok(strip_code_fences(fixed))
    }

    /// Audit the generated code against its specification for a symbol.
    #[instrument(skip_all, fields(symbol = %symbol))]
    pub async fn simulate(&self, spec: &str, code: &str, symbol: &str) -> Result<String> {
        let model = self.selection().await?.resolve(TaskWeight::Heavy);
        let mut request = CompletionRequest::new(
            model,
            prompts::simulate_instruction(symbol),
            prompts::simulate_content(spec, code, symbol),
        );
        if is_pro_tier(&request.model) {
            request = request.with_thinking_budget(REVIEW_THINKING_BUDGET);
        }

        let report = self.complete(&request).await?;
        if report.trim().is_empty() {
            info!("simulation returned no text");
            return Ok(prompts::EMPTY_SIMULATION.to_string());
        }
        Ok(report)
    }
}

fn is_pro_tier(model: &str) -> bool {
    model.contains("pro")
}

/// Quota failure on the pro tier that warrants one retry on the fast tier.
fn is_pro_quota_error(error: &CompletionError) -> bool {
    error.status() == Some(429) || error.message().contains("429") || error.message().contains("quota")
}

/// Remove markdown code fences (```cpp, ```mql5, ```) the model may add.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```cpp", "")
        .replace("```mql5", "")
        .replace("```", "")
        .trim()
        .to_string()
}
