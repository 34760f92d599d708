//! Error types for the orchestration core
//!
//! Every store returns [`ClientError`]. Validation failures never reach the
//! backend, backend failures are surfaced to the user through the notifier,
//! and stale completions are dropped without being shown.

use thiserror::Error;

/// Core error type for wallet client operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Local pre-flight check failed (empty label, bad amount, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend answered with a tagged error result
    #[error("Backend error: {0}")]
    Backend(String),

    /// A completed async call no longer matches the current flow state
    #[error("Stale result discarded: {0}")]
    StaleResultDiscarded(String),

    /// The backend no longer holds an unlocked session
    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Derivation index {index} is occupied: {reason}")]
    IndexOccupied { index: u32, reason: String },

    #[error("Passphrases do not match")]
    PassphraseMismatch,

    #[error("Wallet creation failed: {0}")]
    WalletCreation(String),

    #[error("No wallet is unlocked")]
    NotUnlocked,

    /// Event payload could not be decoded
    #[error("Malformed event on '{topic}': {reason}")]
    MalformedEvent { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a stale-result error naming the operation that was dropped
    pub fn stale(operation: impl Into<String>) -> Self {
        Self::StaleResultDiscarded(operation.into())
    }

    /// Create a malformed event error
    pub fn malformed_event(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error should reach the user at all.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::StaleResultDiscarded(_))
    }

    /// Whether the error came from a local check, i.e. no backend call was made.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::PassphraseMismatch | Self::NotUnlocked
        )
    }
}
