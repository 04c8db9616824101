//! Persisted key-value slots
//!
//! A single JSON file maps slot names to arbitrary JSON values, the on-disk
//! counterpart of browser local storage. All writes use atomic temp-file +
//! rename so a crash never leaves a half-written file, and a tokio Mutex
//! serializes writers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Thread-safe slot file manager.
pub struct KvStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Value>>,
}

impl KvStore {
    /// Load slots from the given file path.
    ///
    /// A missing file is created as `{}` so the next load skips the
    /// cold-start path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading store file: {e}")))?;
            let slots: BTreeMap<String, Value> = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing store file: {e}")))?;
            info!(path = %path.display(), slots = slots.len(), "loaded store");
            slots
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let slots = BTreeMap::new();
            write_atomic(&path, &slots).await?;
            slots
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Clone of the value in `slot`.
    pub async fn get(&self, slot: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state.get(slot).cloned()
    }

    /// Replace the value in `slot` and persist.
    ///
    /// Memory changes only once the file write succeeds.
    pub async fn set(&self, slot: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.insert(slot.to_string(), value);
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(slot, "slot written");
        Ok(())
    }

    /// Remove `slot` and persist. Returns whether the slot existed.
    pub async fn remove(&self, slot: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if next.remove(slot).is_none() {
            return Ok(false);
        }
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(slot, "slot removed");
        Ok(true)
    }

    /// Read-modify-write `slot` under the store lock.
    ///
    /// `f` receives the current value (if any) and returns the new value plus
    /// an output passed back to the caller. Nothing changes if `f` or the
    /// file write fails.
    pub async fn update<T>(
        &self,
        slot: &str,
        f: impl FnOnce(Option<&Value>) -> Result<(Value, T)>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let (value, out) = f(state.get(slot))?;
        let mut next = state.clone();
        next.insert(slot.to_string(), value);
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write slots to a file atomically.
///
/// Writes to a temp file in the same directory, then renames it over the
/// target. Permissions are 0600 since the file holds API keys.
async fn write_atomic(path: &Path, data: &BTreeMap<String, Value>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".architect-store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted store");
    Ok(())
}
