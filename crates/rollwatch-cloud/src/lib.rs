//! rollwatch-cloud: clients for the container orchestrator and the event bus.
//!
//! # Modules
//!
//! - **`orchestrator`**: service and task descriptions, one call per method
//! - **`inventory`**: paginated task listings aggregated over [`Orchestrator`]
//! - **`events`**: lifecycle events and the bus they are published to
//! - **`transport`**: shared JSON 1.1 request/response client

pub mod error;
pub mod events;
pub mod inventory;
pub mod orchestrator;
pub mod transport;

pub use error::{EventBusError, EventBusResult, OrchestratorError, OrchestratorResult, TransportError};
pub use events::{DetailType, EventBus, HttpEventBus, LifecycleEvent, MemoryEventBus};
pub use inventory::TaskInventory;
pub use orchestrator::{
    DeploymentStatus, HttpOrchestrator, Orchestrator, Service, ServiceDeployment, Task, TaskPage,
    TaskStatus,
};
