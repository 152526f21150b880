//! Error types for the rollwatch deployment store.

use thiserror::Error;

/// Result type alias for deployment store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during deployment store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    /// More than one record claims the same rollout id.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

impl StateError {
    /// True when the error reports a broken single-record invariant rather
    /// than a backend failure.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::IntegrityViolation(_))
    }
}
