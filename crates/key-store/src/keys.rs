//! User-supplied API key list
//!
//! Keys live in the `gemini_api_keys` slot as a JSON array of strings, in the
//! order the user entered them. The settings screen edits them as
//! newline-delimited text.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::KvStore;

/// Slot holding the user's API keys
pub const KEYS_SLOT: &str = "gemini_api_keys";

/// Persisted list of user-entered API keys.
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<KvStore>,
}

impl KeyStore {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    /// Stored keys in save order. Malformed slot data reads as empty.
    pub async fn load(&self) -> Vec<String> {
        match self.store.get(KEYS_SLOT).await {
            None => Vec::new(),
            Some(value) => match serde_json::from_value::<Vec<String>>(value) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(error = %e, "stored key list is malformed, ignoring");
                    Vec::new()
                }
            },
        }
    }

    /// Normalize and persist `keys`, returning what was stored.
    pub async fn save(&self, keys: &[String]) -> Result<Vec<String>> {
        let keys = normalize(keys);
        let value = Value::from(keys.clone());
        self.store.set(KEYS_SLOT, value).await?;
        info!(keys = keys.len(), "saved API keys");
        Ok(keys)
    }

    /// Stored keys joined with newlines, for the settings text area.
    pub async fn raw_text(&self) -> String {
        self.load().await.join("\n")
    }
}

/// Drop blank entries and duplicates, keeping the first occurrence.
///
/// Values are compared and stored exactly as given.
pub fn normalize(keys: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if key.trim().is_empty() || out.contains(key) {
            continue;
        }
        out.push(key.clone());
    }
    out
}

/// Split settings text into keys: one per line, trimmed, blanks dropped.
pub fn parse_raw_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
