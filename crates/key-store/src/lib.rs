//! Local persistence for AlgoDao Architect
//!
//! One JSON file holds named slots, the server-side stand-in for browser
//! local storage:
//!
//! - `gemini_api_keys`: the user's API keys in entry order (`KeyStore`)
//! - `algodao_saved_prompts`: the 50 most recent generations (`HistoryStore`)
//! - `gemini_model_preference`: model selection, owned by `key-pool`
//!
//! Every write goes through `KvStore`, which persists atomically with 0600
//! permissions.

pub mod error;
pub mod history;
pub mod keys;
pub mod store;

pub use error::{Error, Result};
pub use history::{HISTORY_SLOT, HistoryStore, MAX_HISTORY, SavedPrompt};
pub use keys::{KEYS_SLOT, KeyStore, normalize, parse_raw_text};
pub use store::KvStore;
