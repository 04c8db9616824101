//! Service error type and its HTTP mapping
//!
//! Every failed request answers with
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.
//! Key values never appear in the message; rotation errors carry only the
//! upstream text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use completion::CompletionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] key_pool::Error),

    #[error("storage error: {0}")]
    Store(#[from] key_store::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("{0} not found")]
    NotFound(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Pool(key_pool::Error::NoCredentialsConfigured) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Pool(key_pool::Error::AllCredentialsExhausted { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::Pool(key_pool::Error::Fatal(_)) => StatusCode::BAD_GATEWAY,
            Error::Pool(key_pool::Error::EmptyModelOverride) => StatusCode::BAD_REQUEST,
            Error::Pool(key_pool::Error::Store(_)) | Error::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Value of the `type` field in the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Pool(key_pool::Error::NoCredentialsConfigured) => "no_credentials",
            Error::Pool(key_pool::Error::AllCredentialsExhausted { .. }) => "credentials_exhausted",
            Error::Pool(key_pool::Error::Fatal(CompletionError::InvalidResponse(_))) => {
                "invalid_response"
            }
            Error::Pool(key_pool::Error::Fatal(_)) => "upstream_error",
            Error::Pool(key_pool::Error::EmptyModelOverride) => "invalid_model",
            Error::Pool(key_pool::Error::Store(_)) | Error::Store(_) => "storage_error",
            Error::InvalidRequest(_) => "invalid_request",
            Error::InvalidResponse(_) => "invalid_response",
            Error::NotFound(_) => "not_found",
        }
    }

    pub fn into_response(self, request_id: &str) -> Response {
        error_response(self.status(), self.kind(), &self.to_string(), request_id)
    }
}

/// JSON error body shared by all handlers.
pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Fresh request identifier, `req_` plus a simple-format uuid.
pub fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}
