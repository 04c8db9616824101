//! API key rotation for Gemini completion calls
//!
//! Holds the process-wide pool of API keys and wraps each logical completion
//! call in a rotation loop: keys are tried in priority order, quota failures
//! demote the current key for the rest of the process, and anything else
//! ends the call at once.
//!
//! Key lifecycle:
//! 1. User saves a key list → stored in entry order, exhaustion cleared
//! 2. A call picks the first key not flagged exhausted (user keys, then the
//!    environment fallback)
//! 3. The service answers with 429/403/503 or a quota message → key flagged,
//!    next key tried
//! 4. No key left → `AllCredentialsExhausted` until the list is saved again
//!
//! The model resolver lives here as well since it shares the preference
//! slot and the fail-fast error type with the pool.

pub mod error;
pub mod model;
pub mod pool;
pub mod quota;
pub mod rotate;

pub use error::{Error, Result};
pub use model::{
    DEBUG_MODEL, FAST_MODEL, ModelPreference, ModelSelection, PREFERENCE_SLOT, PRO_MODEL,
    TaskWeight, resolve_model,
};
pub use pool::{Credential, CredentialPool};
pub use quota::{QUOTA_INDICATORS, RETRYABLE_STATUSES, classify, classify_error};
pub use rotate::RotatingClient;
