//! Lifecycle engine: drives tracked rollouts from start to notification.
//!
//! Three entry points mirror the three triggers. `start` begins tracking a
//! rollout, `progress` reacts to task state changes, and `sweep` notifies
//! on finished and stalled records.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rollwatch_cloud::{DeploymentStatus, Service, TaskInventory, TaskStatus};
use rollwatch_state::{
    DeploymentMatch, DeploymentRecord, DeploymentRepository, Detail, FinishedReason, RecordKey,
    RecordPatch, StateQuery,
};

use crate::clock::{Clock, SystemClock};
use crate::error::{LifecycleError, LifecycleResult};
use crate::notifier::Notifier;
use crate::router::Trigger;

/// Notifications dispatched concurrently per sweep branch.
pub const MAX_IN_FLIGHT_NOTIFICATIONS: usize = 2;

/// Seconds without a heartbeat after which a running record is hanging.
pub const DEFAULT_EXPIRED_THRESHOLD_SECS: u64 = 360;

// ── Inputs and outcomes ────────────────────────────────────────────

/// A rollout of `service` was started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStarted {
    pub cluster: String,
    pub service: String,
}

/// A task changed state.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStateChange {
    /// Rollout that started the task; absent for tasks started outside a
    /// rollout.
    pub started_by: Option<String>,
    pub desired_status: TaskStatus,
    pub last_status: TaskStatus,
    /// Diagnostic payload carried by the state change, kept for failure
    /// notifications.
    pub detail: Option<Detail>,
}

/// What `progress` did with a task state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutcome {
    Ignored,
    Heartbeat,
    Finished(FinishedReason),
}

/// Notifications dispatched by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub succeeded: usize,
    pub failed: usize,
    pub hanging: usize,
}

/// Result of handling a routed trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Started(DeploymentRecord),
    Progress(ProgressOutcome),
    Swept(SweepReport),
    Ignored,
}

impl TriggerOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started(_) => "start",
            Self::Progress(_) => "progress",
            Self::Swept(_) => "sweep",
            Self::Ignored => "ignored",
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LifecycleEngine {
    repository: Arc<dyn DeploymentRepository>,
    inventory: TaskInventory,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    expired_threshold_secs: u64,
}

impl LifecycleEngine {
    pub fn new(
        repository: Arc<dyn DeploymentRepository>,
        inventory: TaskInventory,
        notifier: Notifier,
    ) -> Self {
        Self {
            repository,
            inventory,
            notifier,
            clock: Arc::new(SystemClock),
            expired_threshold_secs: DEFAULT_EXPIRED_THRESHOLD_SECS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_expired_threshold(mut self, secs: u64) -> Self {
        self.expired_threshold_secs = secs;
        self
    }

    pub fn expired_threshold_secs(&self) -> u64 {
        self.expired_threshold_secs
    }

    /// Run the entry point a routed trigger asks for.
    pub async fn handle(&self, trigger: Trigger) -> LifecycleResult<TriggerOutcome> {
        match trigger {
            Trigger::Start(event) => self.start(&event).await.map(TriggerOutcome::Started),
            Trigger::Progress(event) => self.progress(&event).await.map(TriggerOutcome::Progress),
            Trigger::Sweep => self.sweep().await.map(TriggerOutcome::Swept),
            Trigger::Ignored => Ok(TriggerOutcome::Ignored),
        }
    }

    /// Begin tracking the rollout of a service.
    ///
    /// A service scaled to zero has nothing to wait for and is recorded as
    /// already succeeded. Otherwise the service must show exactly one
    /// PRIMARY and one ACTIVE rollout; the store is not touched when it
    /// does not.
    pub async fn start(&self, event: &DeploymentStarted) -> LifecycleResult<DeploymentRecord> {
        let service = self
            .inventory
            .describe_service(&event.cluster, &event.service)
            .await?;
        let key = RecordKey::new(&event.cluster, &event.service);
        let now = self.clock.now();

        if service.desired_count == 0 {
            let record = self
                .repository
                .update(&key, RecordPatch::finish(FinishedReason::Succeeded, None, now))
                .await?;
            info!(id = %record.id, "service scaled to zero, rollout finished");
            return Ok(record);
        }

        let deployment = single_rollout(&service, DeploymentStatus::Primary)?;
        let previous = single_rollout(&service, DeploymentStatus::Active)?;

        let record = self
            .repository
            .update(&key, RecordPatch::begin(deployment, previous, now))
            .await?;
        info!(
            id = %record.id,
            deployment = ?record.deployment,
            previous = ?record.previous_deployment,
            "tracking rollout"
        );
        Ok(record)
    }

    /// React to a task state change.
    pub async fn progress(&self, event: &TaskStateChange) -> LifecycleResult<ProgressOutcome> {
        let stopped = event.last_status == TaskStatus::Stopped;
        let settled = event.last_status == event.desired_status;

        if !(settled || stopped) {
            debug!(last = %event.last_status, desired = %event.desired_status, "task in transition");
            return Ok(ProgressOutcome::Ignored);
        }
        let Some(started_by) = event.started_by.as_deref() else {
            debug!("task not started by a rollout");
            return Ok(ProgressOutcome::Ignored);
        };

        match self.repository.find_deployment_type(started_by).await? {
            DeploymentMatch::Empty => {
                debug!(%started_by, "rollout not tracked");
                Ok(ProgressOutcome::Ignored)
            }
            DeploymentMatch::Current(record) => {
                if stopped {
                    self.finish(&record, FinishedReason::Failed, event.detail.clone())
                        .await
                } else if event.last_status == TaskStatus::Running {
                    self.heartbeat(&record).await
                } else {
                    Ok(ProgressOutcome::Ignored)
                }
            }
            DeploymentMatch::Previous(record) => {
                if stopped {
                    self.check_drained(&record).await
                } else {
                    Ok(ProgressOutcome::Ignored)
                }
            }
        }
    }

    /// Notify on every finished record and every hanging one.
    ///
    /// The two branches run concurrently. Within a branch at most
    /// [`MAX_IN_FLIGHT_NOTIFICATIONS`] notifications run at once; the first
    /// failure stops new ones from starting, while those already dispatched
    /// run to completion.
    pub async fn sweep(&self) -> LifecycleResult<SweepReport> {
        let (finished, expired) = tokio::join!(self.sweep_finished(), self.sweep_expired());
        let (succeeded, failed) = finished?;
        let hanging = expired?;

        let report = SweepReport {
            succeeded,
            failed,
            hanging,
        };
        info!(succeeded, failed, hanging, "sweep complete");
        Ok(report)
    }

    async fn sweep_finished(&self) -> LifecycleResult<(usize, usize)> {
        let records = self.repository.find_finished().await?;
        let succeeded = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let (succeeded_ref, failed_ref) = (&succeeded, &failed);

        stream::iter(records.into_iter().map(Ok::<_, LifecycleError>))
            .try_for_each_concurrent(MAX_IN_FLIGHT_NOTIFICATIONS, |record| {
                let engine = self.clone();
                async move {
                    let reason = tokio::spawn(async move { engine.notify_finished(record).await })
                        .await
                        .map_err(|e| LifecycleError::Join(e.to_string()))??;
                    match reason {
                        FinishedReason::Succeeded => succeeded_ref.fetch_add(1, Ordering::Relaxed),
                        _ => failed_ref.fetch_add(1, Ordering::Relaxed),
                    };
                    Ok::<(), LifecycleError>(())
                }
            })
            .await?;

        Ok((succeeded.into_inner(), failed.into_inner()))
    }

    async fn sweep_expired(&self) -> LifecycleResult<usize> {
        let updated_before = self.clock.now().saturating_sub(self.expired_threshold_secs);
        let records = self
            .repository
            .find_by_state(StateQuery::Running { updated_before })
            .await?;
        let hanging = AtomicUsize::new(0);
        let hanging_ref = &hanging;

        stream::iter(records.into_iter().map(Ok::<_, LifecycleError>))
            .try_for_each_concurrent(MAX_IN_FLIGHT_NOTIFICATIONS, |record| {
                let notifier = self.notifier.clone();
                async move {
                    tokio::spawn(async move {
                        warn!(id = %record.id, last_updated_at = record.last_updated_at, "rollout hanging");
                        notifier.hanging(&record).await
                    })
                    .await
                    .map_err(|e| LifecycleError::Join(e.to_string()))??;
                    hanging_ref.fetch_add(1, Ordering::Relaxed);
                    Ok::<(), LifecycleError>(())
                }
            })
            .await?;

        Ok(hanging.into_inner())
    }

    async fn notify_finished(&self, record: DeploymentRecord) -> LifecycleResult<FinishedReason> {
        match &record.finished_reason {
            Some(FinishedReason::Succeeded) => {
                self.notifier.succeeded(&record).await?;
                Ok(FinishedReason::Succeeded)
            }
            Some(FinishedReason::Failed) => {
                self.notifier
                    .failed(&record, record.finished_detail.as_ref())
                    .await?;
                Ok(FinishedReason::Failed)
            }
            Some(FinishedReason::Unrecognized(reason)) => Err(LifecycleError::Validation(
                format!("cannot handle finished reason {reason} of {}", record.id),
            )),
            None => Err(LifecycleError::Validation(format!(
                "{} is finished without a reason",
                record.id
            ))),
        }
    }

    /// A task of the draining rollout stopped. The rollout is done once
    /// every running task belongs to the new rollout.
    async fn check_drained(&self, record: &DeploymentRecord) -> LifecycleResult<ProgressOutcome> {
        let tasks = self
            .inventory
            .list_tasks(&record.cluster, &record.service, TaskStatus::Running)
            .await?;
        let rollouts: BTreeSet<Option<&str>> =
            tasks.iter().map(|t| t.started_by.as_deref()).collect();

        let drained = match record.deployment.as_deref() {
            Some(current) => rollouts.len() == 1 && rollouts.contains(&Some(current)),
            None => false,
        };
        debug!(id = %record.id, rollouts = rollouts.len(), tasks = tasks.len(), drained, "checked running tasks");

        if drained {
            self.finish(record, FinishedReason::Succeeded, None).await
        } else {
            self.heartbeat(record).await
        }
    }

    async fn finish(
        &self,
        record: &DeploymentRecord,
        reason: FinishedReason,
        detail: Option<Detail>,
    ) -> LifecycleResult<ProgressOutcome> {
        self.repository
            .update(
                &record.key(),
                RecordPatch::finish(reason.clone(), detail, self.clock.now()),
            )
            .await?;
        info!(id = %record.id, %reason, "rollout finished");
        Ok(ProgressOutcome::Finished(reason))
    }

    async fn heartbeat(&self, record: &DeploymentRecord) -> LifecycleResult<ProgressOutcome> {
        self.repository
            .update(&record.key(), RecordPatch::heartbeat(self.clock.now()))
            .await?;
        debug!(id = %record.id, "rollout heartbeat");
        Ok(ProgressOutcome::Heartbeat)
    }
}

/// The id of the one rollout tagged `status`.
fn single_rollout(service: &Service, status: DeploymentStatus) -> LifecycleResult<String> {
    match service.deployments_with_status(&status).as_slice() {
        [one] => Ok(one.id.clone()),
        found => Err(LifecycleError::Validation(format!(
            "expected one {status} rollout for {}, found {}: {:?}",
            service.service_name,
            found.len(),
            service.deployments
        ))),
    }
}
