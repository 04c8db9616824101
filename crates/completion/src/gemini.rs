//! Gemini `generateContent` client
//!
//! Maps a `CompletionRequest` onto the Gemini REST body, sends it with the
//! per-call API key in the `x-goog-api-key` header, and maps the response
//! back. Non-2xx statuses are surfaced as `CompletionError::Http` carrying the
//! `error.message` from Google's JSON error envelope so the rotation layer can
//! classify quota failures.

use crate::{
    CompletionError, CompletionRequest, CompletionResponse, CompletionService, ResponseFormat,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, instrument};

/// Public Gemini API host
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-goog-api-key";

/// HTTP client for the Gemini API.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn generate(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> crate::Result<CompletionResponse> {
        let body = build_body(request);

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, credential)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Transport(format!(
                        "timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    CompletionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CompletionError::Transport(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
                message: error_message(&text, status.canonical_reason()),
            });
        }

        let text = parse_text(&text)?;
        debug!(chars = text.len(), "completion received");
        Ok(CompletionResponse { text })
    }
}

impl CompletionService for GeminiClient {
    fn id(&self) -> &str {
        "gemini"
    }

    fn complete<'a>(
        &'a self,
        credential: &'a str,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = crate::Result<CompletionResponse>> + Send + 'a>> {
        Box::pin(self.generate(credential, request))
    }
}

/// Build the `generateContent` JSON body. Optional config fields are omitted.
pub fn build_body(request: &CompletionRequest) -> Value {
    let contents: Vec<Value> = request
        .contents
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_str(),
                "parts": [{ "text": turn.text }]
            })
        })
        .collect();

    let mut generation_config = serde_json::Map::new();
    if request.response_format == ResponseFormat::Json {
        generation_config.insert("responseMimeType".into(), json!("application/json"));
    }
    if let Some(schema) = &request.schema {
        generation_config.insert("responseSchema".into(), schema.clone());
    }
    if let Some(budget) = request.thinking_budget {
        generation_config.insert("thinkingConfig".into(), json!({ "thinkingBudget": budget }));
    }

    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
        "contents": contents,
    });
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }
    body
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Concatenate the non-thought text parts of the first candidate.
fn parse_text(body: &str) -> crate::Result<String> {
    let parsed: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::InvalidResponse(format!("parsing response: {e}")))?;

    let text = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|p| !p.thought)
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok(text)
}

/// Prefer Google's `error.message`, then the raw body, then the status reason.
fn error_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    reason.unwrap_or("<no body>").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Turn;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::net::TcpListener;

    #[test]
    fn body_for_plain_text_request() {
        let req = CompletionRequest::new("gemini-3-flash-preview", "be brief", "hello");
        let body = build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn body_for_json_schema_and_thinking() {
        let schema = json!({"type": "OBJECT", "properties": {"score": {"type": "INTEGER"}}});
        let req = CompletionRequest::new("gemini-3.1-pro-preview", "sys", "x")
            .with_schema(schema.clone())
            .with_thinking_budget(8192);
        let body = build_body(&req);
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"], schema);
        assert_eq!(config["thinkingConfig"]["thinkingBudget"], 8192);
    }

    #[test]
    fn body_keeps_conversation_roles_in_order() {
        let req = CompletionRequest::conversation(
            "m",
            "sys",
            vec![Turn::user("hi"), Turn::model("hello"), Turn::user("next")],
        );
        let body = build_body(&req);
        let roles: Vec<&str> = body["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn parse_text_joins_parts_and_skips_thoughts() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"thinking...","thought":true},
            {"text":"int OnInit() "},
            {"text":"{ return 0; }"}
        ]}}]}"#;
        assert_eq!(parse_text(body).unwrap(), "int OnInit() { return 0; }");
    }

    #[test]
    fn parse_text_without_candidates_is_empty() {
        assert_eq!(parse_text(r#"{"candidates":[]}"#).unwrap(), "");
        assert_eq!(parse_text("{}").unwrap(), "");
    }

    #[test]
    fn parse_text_rejects_non_json() {
        let err = parse_text("<html>").unwrap_err();
        assert!(matches!(err, CompletionError::InvalidResponse(_)));
    }

    #[test]
    fn error_message_prefers_google_envelope() {
        let body = r#"{"error":{"code":429,"message":"You exceeded your current quota","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(
            error_message(body, Some("Too Many Requests")),
            "You exceeded your current quota"
        );
    }

    #[test]
    fn error_message_falls_back_to_body_then_reason() {
        assert_eq!(error_message("upstream down\n", None), "upstream down");
        assert_eq!(
            error_message("", Some("Service Unavailable")),
            "Service Unavailable"
        );
        assert_eq!(error_message("  ", None), "<no body>");
    }

    /// Start a mock Gemini endpoint that answers every request with `status` and `body`.
    async fn start_mock(status: StatusCode, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(move || async move {
                (
                    status,
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            });
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn complete_returns_text_on_success() {
        let url = start_mock(
            StatusCode::OK,
            r#"{"candidates":[{"content":{"parts":[{"text":"OK"}]}}]}"#,
        )
        .await;
        let client = GeminiClient::new(reqwest::Client::new(), url, Duration::from_secs(5));
        let req = CompletionRequest::new("gemini-3-flash-preview", "sys", "ping");

        let resp = client.complete("AIza-test", &req).await.unwrap();
        assert_eq!(resp.text, "OK");
    }

    #[tokio::test]
    async fn complete_maps_quota_error_status_and_message() {
        let url = start_mock(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"code":429,"message":"Quota exceeded for quota metric","status":"RESOURCE_EXHAUSTED"}}"#,
        )
        .await;
        let client = GeminiClient::new(reqwest::Client::new(), url, Duration::from_secs(5));
        let req = CompletionRequest::new("gemini-3-flash-preview", "sys", "ping");

        let err = client.complete("AIza-test", &req).await.unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.message(), "Quota exceeded for quota metric");
    }

    #[tokio::test]
    async fn complete_unreachable_host_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = GeminiClient::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            Duration::from_secs(2),
        );
        let req = CompletionRequest::new("m", "sys", "ping");
        let err = client.complete("k", &req).await.unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)), "got: {err:?}");
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn request_carries_key_header_and_model_path() {
        // Echo the key header and request path back as the completion text
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().fallback(|request: Request<Body>| async move {
                let key = request
                    .headers()
                    .get(API_KEY_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let text = format!("{key} {}", request.uri().path());
                axum::Json(json!({
                    "candidates": [{ "content": { "parts": [{ "text": text }] } }]
                }))
            });
            axum::serve(listener, app).await.unwrap();
        });

        // Trailing slash on the base URL must not produce a double slash
        let client = GeminiClient::new(
            reqwest::Client::new(),
            format!("http://{addr}/"),
            Duration::from_secs(5),
        );
        let req = CompletionRequest::new("gemini-3-flash-preview", "sys", "ping");
        let resp = client.complete("AIza-secret", &req).await.unwrap();
        assert_eq!(
            resp.text,
            "AIza-secret /v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }
}
