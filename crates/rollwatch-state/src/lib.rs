//! rollwatch-state: deployment record store for rollwatch.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the one-record-per-service progress of rolling deployments.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns, keyed by
//! `{cluster},{service}`. Three secondary indexes answer the lifecycle
//! queries: current rollout id, previous rollout id, and
//! `{state}/{last_updated_at}` for staleness scans.
//!
//! Callers program against [`DeploymentRepository`]; [`StateStore`] is the
//! redb implementation. It is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use repository::DeploymentRepository;
pub use store::StateStore;
pub use types::*;
