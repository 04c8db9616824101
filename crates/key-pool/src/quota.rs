//! Quota detection for completion failures
//!
//! Decides whether a failed attempt should demote the current API key and
//! move on to the next one, or stop the whole call. The decision uses the
//! HTTP status when one is known and a fixed, case-sensitive substring table
//! over the error message otherwise.

use completion::ErrorClassification;

/// Statuses that demote the key: rate limit / quota (429), permission or
/// project quota (403), and model overload (503).
pub const RETRYABLE_STATUSES: &[u16] = &[429, 403, 503];

/// Message fragments that mark a quota or limit failure. Matched
/// case-sensitively, anywhere in the message.
pub const QUOTA_INDICATORS: &[&str] = &["429", "403", "quota", "exhausted", "limit"];

/// Classify a failed attempt by status and message.
///
/// Returns `Retryable` when the status is in `RETRYABLE_STATUSES` or the
/// message contains any of `QUOTA_INDICATORS`; `Fatal` otherwise. A fatal
/// status such as 400 still becomes retryable if the message carries a quota
/// indicator.
pub fn classify(status: Option<u16>, message: &str) -> ErrorClassification {
    if status.is_some_and(|s| RETRYABLE_STATUSES.contains(&s)) {
        return ErrorClassification::Retryable;
    }
    if QUOTA_INDICATORS.iter().any(|needle| message.contains(needle)) {
        return ErrorClassification::Retryable;
    }
    ErrorClassification::Fatal
}

/// Classify a `CompletionError` directly.
pub fn classify_error(error: &completion::CompletionError) -> ErrorClassification {
    classify(error.status(), error.message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use completion::CompletionError;

    #[test]
    fn retryable_statuses() {
        for status in [429, 403, 503] {
            assert_eq!(
                classify(Some(status), ""),
                ErrorClassification::Retryable,
                "status {status}"
            );
        }
    }

    #[test]
    fn bad_request_is_fatal() {
        assert_eq!(
            classify(Some(400), "Invalid JSON payload received"),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn other_server_errors_are_fatal() {
        assert_eq!(
            classify(Some(500), "Internal error encountered."),
            ErrorClassification::Fatal
        );
        assert_eq!(classify(Some(404), "model not found"), ErrorClassification::Fatal);
    }

    #[test]
    fn message_indicators_without_status() {
        let cases = [
            "got 429 from upstream",
            "HTTP 403",
            "You exceeded your current quota",
            "Resource has been exhausted",
            "rate limit reached",
        ];
        for message in cases {
            assert_eq!(
                classify(None, message),
                ErrorClassification::Retryable,
                "message {message:?}"
            );
        }
    }

    #[test]
    fn indicator_overrides_fatal_status() {
        assert_eq!(
            classify(Some(400), "quota project not set"),
            ErrorClassification::Retryable
        );
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(classify(None, "QUOTA EXCEEDED"), ErrorClassification::Fatal);
        assert_eq!(classify(None, "RESOURCE_EXHAUSTED"), ErrorClassification::Fatal);
        assert_eq!(classify(None, "Limit reached"), ErrorClassification::Fatal);
    }

    #[test]
    fn transport_errors_are_fatal_unless_message_matches() {
        let refused = CompletionError::Transport("connection refused".into());
        assert_eq!(classify_error(&refused), ErrorClassification::Fatal);

        let limited = CompletionError::Transport("connection limit exceeded".into());
        assert_eq!(classify_error(&limited), ErrorClassification::Retryable);
    }

    #[test]
    fn empty_message_without_status_is_fatal() {
        assert_eq!(classify(None, ""), ErrorClassification::Fatal);
    }
}
