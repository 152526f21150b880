//! Lifecycle event publishing.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EventBusError, EventBusResult, TransportError};
use crate::transport::JsonTransport;

const PUT_EVENTS_TARGET: &str = "AWSEvents.PutEvents";

/// Kind of lifecycle event emitted for a finished or stalled rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetailType {
    DeploymentSucceeded,
    DeploymentFailed,
    DeploymentHanging,
}

impl DetailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeploymentSucceeded => "DeploymentSucceeded",
            Self::DeploymentFailed => "DeploymentFailed",
            Self::DeploymentHanging => "DeploymentHanging",
        }
    }
}

impl fmt::Display for DetailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event destined for the bus. `detail` is a serialized JSON object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub source: String,
    pub detail_type: DetailType,
    pub detail: String,
}

/// Sink for lifecycle events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a single event. Partial acceptance counts as failure.
    async fn publish(&self, event: &LifecycleEvent) -> EventBusResult<()>;
}

// ── HTTP implementation ────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsRequest<'a> {
    entries: [PutEventsEntry<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsEntry<'a> {
    source: &'a str,
    detail_type: DetailType,
    detail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_bus_name: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResponse {
    #[serde(default)]
    failed_entry_count: u32,
    #[serde(default)]
    entries: Vec<PutEventsResultEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResultEntry {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// [`EventBus`] backed by the PutEvents JSON 1.1 API.
#[derive(Clone)]
pub struct HttpEventBus {
    transport: JsonTransport,
    event_bus_name: Option<String>,
}

impl HttpEventBus {
    /// `event_bus_name` of `None` targets the account's default bus.
    pub fn new(endpoint: &str, event_bus_name: Option<String>) -> Result<Self, TransportError> {
        Ok(Self {
            transport: JsonTransport::new(endpoint)?,
            event_bus_name,
        })
    }
}

#[async_trait]
impl EventBus for HttpEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> EventBusResult<()> {
        let request = PutEventsRequest {
            entries: [PutEventsEntry {
                source: &event.source,
                detail_type: event.detail_type,
                detail: &event.detail,
                event_bus_name: self.event_bus_name.as_deref(),
            }],
        };
        let response: PutEventsResponse = self.transport.call(PUT_EVENTS_TARGET, &request).await?;

        if response.failed_entry_count > 0 {
            let message = response
                .entries
                .iter()
                .filter_map(|e| match (&e.error_code, &e.error_message) {
                    (Some(code), Some(msg)) => Some(format!("{code}: {msg}")),
                    (Some(code), None) => Some(code.clone()),
                    (None, Some(msg)) => Some(msg.clone()),
                    (None, None) => None,
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EventBusError::Rejected {
                failed: response.failed_entry_count,
                message,
            });
        }

        debug!(source = %event.source, detail_type = %event.detail_type, "event published");
        Ok(())
    }
}

// ── In-memory implementation ───────────────────────────────────────

/// [`EventBus`] collecting events in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    inner: Arc<Mutex<MemoryBusState>>,
}

#[derive(Default)]
struct MemoryBusState {
    events: Vec<LifecycleEvent>,
    failing: bool,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail without recording the event.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut state) = self.inner.lock() {
            state.failing = failing;
        }
    }

    /// Snapshot of every event accepted so far.
    pub fn published(&self) -> Vec<LifecycleEvent> {
        self.inner
            .lock()
            .map(|state| state.events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> EventBusResult<()> {
        let mut state = self.inner.lock().map_err(|e| EventBusError::Rejected {
            failed: 1,
            message: e.to_string(),
        })?;
        if state.failing {
            return Err(EventBusError::Rejected {
                failed: 1,
                message: "memory bus is failing".to_string(),
            });
        }
        state.events.push(event.clone());
        Ok(())
    }
}
