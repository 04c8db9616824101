//! Model selection policy
//!
//! Maps a task's weight and the user's stored preference to a concrete
//! Gemini model identifier. The preference lives in the
//! `gemini_model_preference` slot next to the key list.

use key_store::KvStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Lightweight tier, used for analysis, consulting and spec generation.
pub const FAST_MODEL: &str = "gemini-3-flash-preview";

/// High-capability tier, used for code generation and simulation.
pub const PRO_MODEL: &str = "gemini-3.1-pro-preview";

/// Model used for compiler-error repair regardless of preference.
pub const DEBUG_MODEL: &str = "gemini-3-pro-preview";

/// Slot holding the serialized `ModelSelection`
pub const PREFERENCE_SLOT: &str = "gemini_model_preference";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPreference {
    /// Heavy tasks on the pro tier, light tasks on the fast tier
    #[default]
    Auto,
    Fast,
    Pro,
    /// Use `ModelSelection::custom_model` verbatim
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskWeight {
    Light,
    Heavy,
}

/// Pick the model for a task.
///
/// A custom identifier is returned verbatim, unknown models included; the
/// remote service rejects what it does not serve.
pub fn resolve_model(weight: TaskWeight, preference: ModelPreference, custom: Option<&str>) -> String {
    match preference {
        ModelPreference::Custom => custom.unwrap_or_default().to_string(),
        ModelPreference::Fast => FAST_MODEL.to_string(),
        ModelPreference::Pro => PRO_MODEL.to_string(),
        ModelPreference::Auto => match weight {
            TaskWeight::Heavy => PRO_MODEL.to_string(),
            TaskWeight::Light => FAST_MODEL.to_string(),
        },
    }
}

/// Stored preference plus the optional explicit model identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub preference: ModelPreference,
    #[serde(default)]
    pub custom_model: Option<String>,
}

impl ModelSelection {
    pub fn resolve(&self, weight: TaskWeight) -> String {
        resolve_model(weight, self.preference, self.custom_model.as_deref())
    }

    /// Reject a custom preference without a usable identifier.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.preference == ModelPreference::Custom
            && self
                .custom_model
                .as_deref()
                .is_none_or(|m| m.trim().is_empty())
        {
            return Err(Error::EmptyModelOverride);
        }
        Ok(())
    }

    /// Stored selection, or the default when absent or malformed.
    pub async fn load(store: &KvStore) -> Self {
        match store.get(PREFERENCE_SLOT).await {
            None => Self::default(),
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "stored model preference is malformed, using auto");
                Self::default()
            }),
        }
    }

    /// Validate and persist.
    pub async fn save(&self, store: &KvStore) -> Result<()> {
        self.ensure_ready()?;
        let value = serde_json::to_value(self)
            .map_err(|e| key_store::Error::Parse(format!("encoding model preference: {e}")))?;
        store.set(PREFERENCE_SLOT, value).await?;
        info!(preference = ?self.preference, custom_model = ?self.custom_model, "model preference saved");
        Ok(())
    }
}
