//! Completion service abstraction for the hosted LLM
//!
//! Defines the `CompletionService` trait that decouples the generation
//! operations from the remote API. `GeminiClient` implements it over the
//! Gemini `generateContent` REST endpoint; tests substitute scripted fakes.
//!
//! The credential is passed per call rather than held by the client so a
//! rotation wrapper can try several keys against the same service instance.

pub mod gemini;

pub use gemini::GeminiClient;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Classification of a failed completion attempt.
///
/// - Retryable: quota, rate limit or overload; another credential may succeed
/// - Fatal: malformed request or anything else; rotating keys cannot help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Retryable,
    Fatal,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One turn of conversation content sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Requested response encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

/// A single completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_instruction: String,
    pub contents: Vec<Turn>,
    pub response_format: ResponseFormat,
    /// JSON schema constraining the response; only meaningful with `ResponseFormat::Json`
    pub schema: Option<serde_json::Value>,
    /// Reasoning token budget for models that support thinking
    pub thinking_budget: Option<u32>,
}

impl CompletionRequest {
    /// Single-turn text request.
    pub fn new(
        model: impl Into<String>,
        system_instruction: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            contents: vec![Turn::user(content)],
            response_format: ResponseFormat::Text,
            schema: None,
            thinking_budget: None,
        }
    }

    /// Multi-turn request; the caller supplies the whole conversation.
    pub fn conversation(
        model: impl Into<String>,
        system_instruction: impl Into<String>,
        contents: Vec<Turn>,
    ) -> Self {
        Self {
            contents,
            ..Self::new(model, system_instruction, String::new())
        }
    }

    /// Ask for an `application/json` response.
    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::Json;
        self
    }

    /// Ask for JSON matching `schema`.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_format = ResponseFormat::Json;
        self.schema = Some(schema);
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }
}

/// Successful completion. `text` is empty when the model returned no text parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
}

/// Errors from a completion call.
///
/// Every variant exposes an optional HTTP status and a message so callers can
/// classify the failure without matching on transport details.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("completion service returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// HTTP status reported by the service, if the failure got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message used for classification and display.
    pub fn message(&self) -> &str {
        match self {
            CompletionError::Http { message, .. } => message,
            CompletionError::Transport(message) => message,
            CompletionError::InvalidResponse(message) => message,
        }
    }
}

/// Result alias for completion calls.
pub type Result<T> = std::result::Result<T, CompletionError>;

/// Abstraction over the remote text-completion endpoint.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CompletionService>`).
pub trait CompletionService: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Run one completion with the given credential.
    fn complete<'a>(
        &'a self,
        credential: &'a str,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse>> + Send + 'a>>;
}
