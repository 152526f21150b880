//! Domain types for the deployment store.
//!
//! A `DeploymentRecord` tracks one (cluster, service) pair while a rollout
//! is in flight. Records are JSON-serialized into redb value columns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a tracked service. Renders as the `{cluster},{service}` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub cluster: String,
    pub service: String,
}

impl RecordKey {
    pub fn new(cluster: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            service: service.into(),
        }
    }

    /// Build the primary key for the deployments table.
    pub fn table_key(&self) -> String {
        format!("{},{}", self.cluster, self.service)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.cluster, self.service)
    }
}

// ── Record ─────────────────────────────────────────────────────────

/// Persisted progress of one rollout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: String,
    pub cluster: String,
    pub service: String,
    /// Current (PRIMARY) rollout id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    /// Rollout being drained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_deployment: Option<String>,
    #[serde(default)]
    pub state: DeploymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_reason: Option<FinishedReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_detail: Option<Detail>,
    /// Unix timestamp (seconds) of the last heartbeat or state change.
    #[serde(default)]
    pub last_updated_at: u64,
}

impl DeploymentRecord {
    /// An empty running record for `key`, used when an update targets a
    /// key that does not exist yet.
    pub fn new(key: &RecordKey) -> Self {
        Self {
            id: key.table_key(),
            cluster: key.cluster.clone(),
            service: key.service.clone(),
            deployment: None,
            previous_deployment: None,
            state: DeploymentState::Running,
            finished_reason: None,
            finished_detail: None,
            last_updated_at: 0,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.cluster, &self.service)
    }

    /// Apply a patch in place. Fields absent from the patch are untouched.
    pub fn apply(&mut self, patch: RecordPatch) {
        if let Some(deployment) = patch.deployment {
            self.deployment = Some(deployment);
        }
        if let Some(previous) = patch.previous_deployment {
            self.previous_deployment = Some(previous);
        }
        if let Some(ts) = patch.last_updated_at {
            self.last_updated_at = ts;
        }
        match patch.transition {
            Some(Transition::Begin) => {
                self.state = DeploymentState::Running;
                self.finished_reason = None;
                self.finished_detail = None;
            }
            Some(Transition::Finish { reason, detail }) => {
                self.state = DeploymentState::Finished;
                self.finished_reason = Some(reason);
                self.finished_detail = detail;
            }
            None => {}
        }
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    #[default]
    Running,
    Finished,
}

impl DeploymentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record reached `Finished`.
///
/// Values written by other tools or older versions land in `Unrecognized`
/// instead of failing deserialization of the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishedReason {
    Succeeded,
    Failed,
    #[serde(untagged)]
    Unrecognized(String),
}

impl fmt::Display for FinishedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed => f.write_str("failed"),
            Self::Unrecognized(other) => f.write_str(other),
        }
    }
}

/// Opaque diagnostic payload reported by the orchestrator.
///
/// Holds raw JSON text; the store never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Detail(String);

impl Detail {
    pub fn new(json: impl Into<String>) -> Self {
        Self(json.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ── Updates ────────────────────────────────────────────────────────

/// State change carried by a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Start (or restart) tracking: state becomes Running, finished fields
    /// are cleared.
    Begin,
    /// Running → Finished.
    Finish {
        reason: FinishedReason,
        detail: Option<Detail>,
    },
}

/// Set of attribute values merged into a record by `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub deployment: Option<String>,
    pub previous_deployment: Option<String>,
    pub transition: Option<Transition>,
    pub last_updated_at: Option<u64>,
}

impl RecordPatch {
    /// Begin tracking a rollout that replaces `previous`.
    pub fn begin(deployment: impl Into<String>, previous: impl Into<String>, now: u64) -> Self {
        Self {
            deployment: Some(deployment.into()),
            previous_deployment: Some(previous.into()),
            transition: Some(Transition::Begin),
            last_updated_at: Some(now),
        }
    }

    /// Only bump `last_updated_at`.
    pub fn heartbeat(now: u64) -> Self {
        Self {
            last_updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Mark the record finished.
    pub fn finish(reason: FinishedReason, detail: Option<Detail>, now: u64) -> Self {
        Self {
            transition: Some(Transition::Finish { reason, detail }),
            last_updated_at: Some(now),
            ..Default::default()
        }
    }
}

// ── Queries ────────────────────────────────────────────────────────

/// Typed query against the state index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuery {
    /// Running records last updated strictly before the given timestamp.
    Running { updated_before: u64 },
    /// Every finished record.
    Finished,
}

/// Which side of a rollout a rollout id refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentMatch {
    /// The id is the record's current rollout.
    Current(DeploymentRecord),
    /// The id is the rollout the record is draining.
    Previous(DeploymentRecord),
    /// No record tracks this id.
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> DeploymentRecord {
        let mut record = DeploymentRecord::new(&RecordKey::new("prod", "api"));
        record.apply(RecordPatch::begin("new", "old", 1000));
        record
    }

    #[test]
    fn key_joins_cluster_and_service() {
        let key = RecordKey::new("prod", "api");
        assert_eq!(key.table_key(), "prod,api");
        assert_eq!(key.to_string(), "prod,api");
    }

    #[test]
    fn heartbeat_only_touches_timestamp() {
        let mut record = running();
        let before = record.clone();
        record.apply(RecordPatch::heartbeat(2000));

        assert_eq!(record.last_updated_at, 2000);
        assert_eq!(record.deployment, before.deployment);
        assert_eq!(record.previous_deployment, before.previous_deployment);
        assert_eq!(record.state, DeploymentState::Running);
    }

    #[test]
    fn finish_sets_reason_and_detail() {
        let mut record = running();
        record.apply(RecordPatch::finish(
            FinishedReason::Failed,
            Some(Detail::new(r#"{"stoppedReason":"OOM"}"#)),
            3000,
        ));

        assert_eq!(record.state, DeploymentState::Finished);
        assert_eq!(record.finished_reason, Some(FinishedReason::Failed));
        assert_eq!(
            record.finished_detail.as_ref().map(Detail::as_str),
            Some(r#"{"stoppedReason":"OOM"}"#)
        );
    }

    #[test]
    fn begin_clears_finished_fields() {
        let mut record = running();
        record.apply(RecordPatch::finish(FinishedReason::Succeeded, None, 3000));
        record.apply(RecordPatch::begin("newer", "new", 4000));

        assert_eq!(record.state, DeploymentState::Running);
        assert!(record.finished_reason.is_none());
        assert_eq!(record.previous_deployment.as_deref(), Some("new"));
    }

    #[test]
    fn unknown_reason_is_preserved() {
        let json = r#"{"id":"c,s","cluster":"c","service":"s","state":"finished","finished_reason":"cancelled","last_updated_at":5}"#;
        let record: DeploymentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.finished_reason,
            Some(FinishedReason::Unrecognized("cancelled".to_string()))
        );
    }

    #[test]
    fn persisted_layout_uses_snake_case() {
        let mut record = running();
        record.apply(RecordPatch::finish(FinishedReason::Succeeded, None, 3000));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["state"], "finished");
        assert_eq!(json["finished_reason"], "succeeded");
        assert_eq!(json["previous_deployment"], "old");
        assert!(json.get("finished_detail").is_none());
    }
}
