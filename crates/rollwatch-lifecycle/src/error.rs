//! Errors returned by lifecycle entry points.

use rollwatch_cloud::{EventBusError, OrchestratorError};
use rollwatch_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("store: {0}")]
    Store(#[from] StateError),

    #[error("orchestrator: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("event bus: {0}")]
    EventBus(#[from] EventBusError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("serialize: {0}")]
    Serialize(String),

    /// A spawned notification task panicked or was aborted.
    #[error("notification task failed: {0}")]
    Join(String),
}

impl LifecycleError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
