//! rollwatch-lifecycle: tracks rolling deployments from start to notification.
//!
//! A rollout is tracked per service from the moment it starts until every
//! task of the previous rollout is gone (succeeded), a task of the new
//! rollout stops (failed), or it stops reporting progress (hanging).
//!
//! # Components
//!
//! - **`router`**: classifies trigger envelopes into entry points
//! - **`engine`**: `start`, `progress` and `sweep`
//! - **`notifier`**: publishes terminal events and removes records
//! - **`clock`**: injectable time source

pub mod clock;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod router;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{
    DEFAULT_EXPIRED_THRESHOLD_SECS, DeploymentStarted, LifecycleEngine, MAX_IN_FLIGHT_NOTIFICATIONS,
    ProgressOutcome, SweepReport, TaskStateChange, TriggerOutcome,
};
pub use error::{LifecycleError, LifecycleResult};
pub use notifier::Notifier;
pub use router::{RouterConfig, StartOrigin, Trigger, TriggerEnvelope, TriggerRouter};
