//! Credential pool with per-process exhaustion tracking
//!
//! The pool lists user-entered API keys in entry order followed by an
//! optional environment fallback key, deduplicated by exact value. Keys that
//! hit a quota error are flagged exhausted for the rest of the process and
//! skipped by `next_available`. Saving a new key list clears every flag.
//!
//! The pool is shared via `Arc` between concurrent requests; a flag set by
//! one request is seen by all others on their next selection.

use common::Secret;
use key_store::KeyStore;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;

/// An API key. Debug output shows only the redacted suffix.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Secret::new(value.into()))
    }

    /// Raw key value for the outgoing request.
    pub fn expose(&self) -> &str {
        self.0.expose()
    }

    /// `...` plus the last four chars, for logs only.
    pub fn redacted(&self) -> String {
        self.0.redacted()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.redacted())
    }
}

/// Ordered, deduplicated set of API keys plus their exhaustion flags.
pub struct CredentialPool {
    user: RwLock<Vec<Credential>>,
    fallback: Option<Credential>,
    exhausted: RwLock<Vec<Credential>>,
    store: Option<KeyStore>,
}

impl CredentialPool {
    /// In-memory pool. `user_keys` are normalized (blanks and duplicates
    /// dropped); a blank fallback counts as absent.
    pub fn new(user_keys: Vec<String>, fallback: Option<Secret<String>>) -> Self {
        let user: Vec<Credential> = key_store::normalize(&user_keys)
            .into_iter()
            .map(Credential::new)
            .collect();
        let fallback = fallback
            .filter(|key| !key.expose().trim().is_empty())
            .map(|key| Credential::new(key.expose().clone()));

        info!(
            user_keys = user.len(),
            fallback = fallback.is_some(),
            "credential pool initialized"
        );
        Self {
            user: RwLock::new(user),
            fallback,
            exhausted: RwLock::new(Vec::new()),
            store: None,
        }
    }

    /// Pool backed by the persisted key list; `save` writes through to it.
    pub async fn from_store(store: KeyStore, fallback: Option<Secret<String>>) -> Self {
        let keys = store.load().await;
        Self {
            store: Some(store),
            ..Self::new(keys, fallback)
        }
    }

    /// User keys in save order, then the fallback unless it duplicates one.
    pub async fn list_all(&self) -> Vec<Credential> {
        let mut all = self.user.read().await.clone();
        match &self.fallback {
            Some(fallback) if !all.contains(fallback) => all.push(fallback.clone()),
            _ => {}
        }
        all
    }

    pub async fn has_any(&self) -> bool {
        !self.list_all().await.is_empty()
    }

    /// First key in `list_all` order that is not exhausted.
    pub async fn next_available(&self) -> Option<Credential> {
        let all = self.list_all().await;
        let exhausted = self.exhausted.read().await;
        all.into_iter().find(|c| !exhausted.contains(c))
    }

    /// Flag `credential` as exhausted until the next `save`.
    pub async fn mark_exhausted(&self, credential: &Credential) {
        let mut exhausted = self.exhausted.write().await;
        if exhausted.contains(credential) {
            return;
        }
        exhausted.push(credential.clone());
        warn!(key = %credential.redacted(), "API key marked as exhausted");
        metrics::counter!("credential_exhaustions_total").increment(1);
    }

    pub async fn is_exhausted(&self, credential: &Credential) -> bool {
        self.exhausted.read().await.contains(credential)
    }

    /// Replace the user key list and clear all exhaustion flags.
    ///
    /// Input is normalized first. A store-backed pool persists before the
    /// in-memory list changes, so a failed write leaves the pool untouched.
    /// Returns the normalized list.
    pub async fn save(&self, keys: &[String]) -> Result<Vec<String>> {
        let keys = match &self.store {
            Some(store) => store.save(keys).await?,
            None => key_store::normalize(keys),
        };

        // Lock order is always user, then exhausted
        let mut user = self.user.write().await;
        *user = keys.iter().cloned().map(Credential::new).collect();
        self.exhausted.write().await.clear();
        info!(user_keys = user.len(), "credential list saved, exhaustion reset");
        Ok(keys)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Pool summary for health reporting. Never contains key values.
    ///
    /// Status: all keys available → healthy, some → degraded, none → unhealthy.
    pub async fn snapshot(&self) -> serde_json::Value {
        let user_count = self.user.read().await.len();
        let all = self.list_all().await;
        let exhausted = self.exhausted.read().await;

        let mut available = 0usize;
        let credentials: Vec<serde_json::Value> = all
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let is_exhausted = exhausted.contains(c);
                if !is_exhausted {
                    available += 1;
                }
                serde_json::json!({
                    "key": c.redacted(),
                    "source": if i < user_count { "user" } else { "environment" },
                    "status": if is_exhausted { "exhausted" } else { "available" },
                })
            })
            .collect();

        let total = all.len();
        let status = if total > 0 && available == total {
            "healthy"
        } else if available > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "credentials_total": total,
            "credentials_available": available,
            "credentials_exhausted": total - available,
            "credentials": credentials,
        })
    }
}
