//! Generation history
//!
//! Saved specifications live newest-first in the `algodao_saved_prompts`
//! slot. Only the most recent `MAX_HISTORY` records are kept.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::KvStore;

/// Slot holding saved generation records
pub const HISTORY_SLOT: &str = "algodao_saved_prompts";

/// Upper bound on stored records; older ones are dropped on save.
pub const MAX_HISTORY: usize = 50;

/// One saved generation.
///
/// `timestamp` is unix milliseconds. `settings` is the configuration object
/// exactly as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPrompt {
    pub id: String,
    pub timestamp: u64,
    pub name: String,
    pub settings: Value,
    pub prompt: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<KvStore>,
}

impl HistoryStore {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    /// All records, newest first. Malformed slot data reads as empty.
    pub async fn list(&self) -> Vec<SavedPrompt> {
        match self.store.get(HISTORY_SLOT).await {
            None => Vec::new(),
            Some(value) => decode(value),
        }
    }

    /// Record a new generation at the front of the history.
    pub async fn save(&self, name: String, settings: Value, prompt: String) -> Result<SavedPrompt> {
        let record = SavedPrompt {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            name,
            settings,
            prompt,
        };

        let saved = record.clone();
        self.store
            .update(HISTORY_SLOT, move |current| {
                let mut records = current.cloned().map(decode).unwrap_or_default();
                records.insert(0, record);
                records.truncate(MAX_HISTORY);
                Ok((encode(&records)?, ()))
            })
            .await?;

        debug!(id = %saved.id, "history record saved");
        Ok(saved)
    }

    /// Delete the record with `id`. Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .store
            .update(HISTORY_SLOT, |current| {
                let mut records = current.cloned().map(decode).unwrap_or_default();
                let before = records.len();
                records.retain(|r| r.id != id);
                let removed = records.len() != before;
                Ok((encode(&records)?, removed))
            })
            .await?;
        if removed {
            debug!(id, "history record deleted");
        }
        Ok(removed)
    }

    /// Drop the whole history.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(HISTORY_SLOT).await?;
        Ok(())
    }
}

fn decode(value: Value) -> Vec<SavedPrompt> {
    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "saved history is malformed, ignoring");
        Vec::new()
    })
}

fn encode(records: &[SavedPrompt]) -> Result<Value> {
    serde_json::to_value(records).map_err(|e| Error::Parse(format!("encoding history: {e}")))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn history(dir: &tempfile::TempDir) -> (HistoryStore, Arc<KvStore>) {
        let kv = Arc::new(KvStore::load(dir.path().join("store.json")).await.unwrap());
        (HistoryStore::new(kv.clone()), kv)
    }

    #[tokio::test]
    async fn save_prepends_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (history, _) = history(&dir).await;

        let first = history
            .save("Gold Scalper".into(), json!({"symbol": "XAUUSD"}), "spec 1".into())
            .await
            .unwrap();
        let second = history
            .save("Euro Grid".into(), json!({"symbol": "EURUSD"}), "spec 2".into())
            .await
            .unwrap();

        let records = history.list().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second.id);
        assert_eq!(records[1].id, first.id);
        assert_eq!(records[1].settings["symbol"], "XAUUSD");
        assert_ne!(first.id, second.id);
        assert!(first.timestamp > 0);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let (history, _) = history(&dir).await;

        for i in 0..(MAX_HISTORY + 5) {
            history
                .save(format!("ea-{i}"), json!({}), format!("prompt {i}"))
                .await
                .unwrap();
        }

        let records = history.list().await;
        assert_eq!(records.len(), MAX_HISTORY);
        assert_eq!(records[0].name, format!("ea-{}", MAX_HISTORY + 4));
        assert_eq!(records[MAX_HISTORY - 1].name, "ea-5");
    }

    #[tokio::test]
    async fn delete_removes_only_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let (history, _) = history(&dir).await;
        let keep = history.save("a".into(), json!({}), "p".into()).await.unwrap();
        let gone = history.save("b".into(), json!({}), "p".into()).await.unwrap();

        assert!(history.delete(&gone.id).await.unwrap());
        assert!(!history.delete(&gone.id).await.unwrap());

        let records = history.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, keep.id);
    }

    #[tokio::test]
    async fn clear_empties_history() {
        let dir = tempfile::tempdir().unwrap();
        let (history, kv) = history(&dir).await;
        history.save("a".into(), json!({}), "p".into()).await.unwrap();

        history.clear().await.unwrap();
        assert!(history.list().await.is_empty());
        assert!(kv.get(HISTORY_SLOT).await.is_none());
    }

    #[tokio::test]
    async fn malformed_history_reads_empty_and_is_replaced_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let (history, kv) = history(&dir).await;
        kv.set(HISTORY_SLOT, json!("garbage")).await.unwrap();

        assert!(history.list().await.is_empty());
        history.save("a".into(), json!({}), "p".into()).await.unwrap();
        assert_eq!(history.list().await.len(), 1);
    }

    #[test]
    fn record_serializes_expected_fields() {
        let record = SavedPrompt {
            id: "id-1".into(),
            timestamp: 1_700_000_000_000,
            name: "n".into(),
            settings: json!({"grid": {"enabled": true}}),
            prompt: "p".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["id", "name", "prompt", "settings", "timestamp"]);
    }
}
