//! The classified-error shape threaded through the retry pipeline (§4.I):
//! every dispatch failure carries whether the next tier should be tried.

use std::fmt;

#[derive(Debug, Clone)]
pub struct ClassifiedError {
    pub message: String,
    pub status_code: u16,
    pub retryable: bool,
}

impl ClassifiedError {
    pub fn new(message: impl Into<String>, status_code: u16, retryable: bool) -> Self {
        Self {
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// A transport-layer failure (connect/timeout/DNS/TLS) — always worth
    /// failing over to the next candidate (§4.I, §9).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(message, 502, true)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClassifiedError {}
