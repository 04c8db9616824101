//! Key rotation around a single logical completion call
//!
//! `RotatingClient::execute` tries pool keys one at a time in priority order.
//! Quota-class failures demote the key and move on; any other failure ends
//! the call. Attempts within one call are strictly sequential.

use std::future::Future;
use std::sync::Arc;

use completion::{
    CompletionError, CompletionRequest, CompletionResponse, CompletionService,
    ErrorClassification,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pool::{Credential, CredentialPool};
use crate::quota::classify_error;

/// Runs completion operations against the shared credential pool.
#[derive(Clone)]
pub struct RotatingClient {
    pool: Arc<CredentialPool>,
}

impl RotatingClient {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Run `operation` with successive available keys until one succeeds.
    ///
    /// Fails with `NoCredentialsConfigured` before any attempt when the pool
    /// is empty, with `Fatal` on the first non-quota failure, and with
    /// `AllCredentialsExhausted` once no unexhausted key remains. Dropping
    /// the returned future stops rotation at the current attempt.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = completion::Result<T>>,
    {
        if !self.pool.has_any().await {
            warn!("completion requested with no API key configured");
            return Err(Error::NoCredentialsConfigured);
        }

        let mut last: Option<CompletionError> = None;
        let mut attempt = 0u32;

        while let Some(credential) = self.pool.next_available().await {
            attempt += 1;
            let key = credential.redacted();
            debug!(key = %key, attempt, "trying API key");

            match operation(credential.clone()).await {
                Ok(value) => {
                    metrics::counter!("completion_attempts_total", "outcome" => "success")
                        .increment(1);
                    if attempt > 1 {
                        info!(key = %key, attempt, "completion succeeded after rotation");
                    }
                    return Ok(value);
                }
                Err(e) => match classify_error(&e) {
                    ErrorClassification::Retryable => {
                        metrics::counter!("completion_attempts_total", "outcome" => "retryable")
                            .increment(1);
                        warn!(
                            key = %key,
                            attempt,
                            status = ?e.status(),
                            error = %e,
                            "API key hit quota, rotating"
                        );
                        self.pool.mark_exhausted(&credential).await;
                        last = Some(e);
                    }
                    ErrorClassification::Fatal => {
                        metrics::counter!("completion_attempts_total", "outcome" => "fatal")
                            .increment(1);
                        warn!(key = %key, attempt, error = %e, "completion failed");
                        return Err(Error::Fatal(e));
                    }
                },
            }
        }

        warn!(attempts = attempt, "all API keys exhausted");
        Err(Error::AllCredentialsExhausted { last })
    }

    /// Run one request against `service` with key rotation.
    pub async fn complete(
        &self,
        service: &dyn CompletionService,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        self.execute(|credential| async move {
            service.complete(credential.expose(), request).await
        })
        .await
    }
}
