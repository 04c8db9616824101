//! Secret wrapper for API keys and other sensitive values

use std::fmt;
use zeroize::Zeroize;

/// Number of trailing characters kept by [`Secret::redacted`].
const REDACTED_SUFFIX_LEN: usize = 4;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Short form safe for diagnostic logs: `...` followed by the last four chars.
    ///
    /// Values of four chars or fewer collapse to `...` so nothing is revealed.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

/// Redact a raw secret string the same way [`Secret::redacted`] does.
pub fn redact(value: &str) -> String {
    let count = value.chars().count();
    if count <= REDACTED_SUFFIX_LEN {
        return "...".to_string();
    }
    let suffix: String = value.chars().skip(count - REDACTED_SUFFIX_LEN).collect();
    format!("...{suffix}")
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Zeroize + Eq> Eq for Secret<T> {}
