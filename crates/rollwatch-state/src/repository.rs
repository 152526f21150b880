//! Repository contract for deployment records.
//!
//! Callers see typed queries only; which index answers which query is an
//! implementation detail of the backend.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::error::{StateError, StateResult};
use crate::types::*;

/// Persistence for deployment records.
///
/// `update` must merge atomically per key. Implementations do not enforce
/// the single-record-per-rollout invariants; `find_deployment_type` detects
/// violations instead.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Merge `patch` into the record at `key`, creating it if absent.
    /// Returns the record as stored.
    async fn update(&self, key: &RecordKey, patch: RecordPatch) -> StateResult<DeploymentRecord>;

    /// Remove the record at `key`. Returns whether it existed.
    async fn delete(&self, key: &RecordKey) -> StateResult<bool>;

    /// Records whose current rollout is `rollout_id`.
    async fn find_by_deployment(&self, rollout_id: &str) -> StateResult<Vec<DeploymentRecord>>;

    /// Records whose previous rollout is `rollout_id`.
    async fn find_by_previous_deployment(
        &self,
        rollout_id: &str,
    ) -> StateResult<Vec<DeploymentRecord>>;

    /// Records matching a state query.
    async fn find_by_state(&self, query: StateQuery) -> StateResult<Vec<DeploymentRecord>>;

    /// Every record.
    async fn list_records(&self) -> StateResult<Vec<DeploymentRecord>>;

    /// Resolve which record (if any) a rollout id belongs to.
    ///
    /// The previous-rollout query is only issued once the current-rollout
    /// query came back empty.
    async fn find_deployment_type(&self, rollout_id: &str) -> StateResult<DeploymentMatch> {
        let mut current = self.find_by_deployment(rollout_id).await?;
        match current.len() {
            0 => {}
            1 => return Ok(DeploymentMatch::Current(current.remove(0))),
            n => {
                return Err(StateError::IntegrityViolation(format!(
                    "found {n} current deployments for {rollout_id}"
                )));
            }
        }

        let mut previous = self.find_by_previous_deployment(rollout_id).await?;
        match previous.len() {
            0 => Ok(DeploymentMatch::Empty),
            1 => Ok(DeploymentMatch::Previous(previous.remove(0))),
            n => Err(StateError::IntegrityViolation(format!(
                "found {n} previous deployments for {rollout_id}"
            ))),
        }
    }

    /// Running records without a heartbeat for more than `threshold_secs`.
    async fn find_expired(&self, threshold_secs: u64) -> StateResult<Vec<DeploymentRecord>> {
        let updated_before = epoch_secs().saturating_sub(threshold_secs);
        self.find_by_state(StateQuery::Running { updated_before }).await
    }

    /// Every finished record awaiting notification.
    async fn find_finished(&self) -> StateResult<Vec<DeploymentRecord>> {
        self.find_by_state(StateQuery::Finished).await
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
