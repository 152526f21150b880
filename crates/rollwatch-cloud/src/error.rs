//! Error types for the orchestrator and event bus clients.

use thiserror::Error;

/// Failures of the JSON-over-HTTP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Errors returned by orchestrator calls.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("service {service} not found in cluster {cluster}")]
    ServiceNotFound { cluster: String, service: String },
}

/// Errors returned by event bus calls.
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("event bus rejected {failed} entries: {message}")]
    Rejected { failed: u32, message: String },
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
pub type EventBusResult<T> = Result<T, EventBusError>;
