//! Common types for the AlgoDao Architect workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, redact};
