//! Error types for rotated completion calls

use completion::CompletionError;

/// Terminal outcome of a rotated call. Retryable per-key failures never
/// surface on their own; they either lead to the next key or end up inside
/// `AllCredentialsExhausted`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no API key configured: add a Gemini API key in the key settings")]
    NoCredentialsConfigured,

    #[error(
        "all API keys are out of quota; add another key or wait a minute and retry{}",
        last_detail(.last)
    )]
    AllCredentialsExhausted {
        #[source]
        last: Option<CompletionError>,
    },

    #[error(transparent)]
    Fatal(CompletionError),

    #[error("custom model selected but no model identifier is configured")]
    EmptyModelOverride,

    #[error("key store error: {0}")]
    Store(#[from] key_store::Error),
}

fn last_detail(last: &Option<CompletionError>) -> String {
    match last {
        Some(e) => format!(" (last error: {})", e.message()),
        None => String::new(),
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
