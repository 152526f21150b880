//! Trigger routing: map incoming event envelopes to engine entry points.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use rollwatch_cloud::TaskStatus;
use rollwatch_state::Detail;

use crate::engine::{DeploymentStarted, TaskStateChange};
use crate::error::{LifecycleError, LifecycleResult};

/// An event as delivered by the bus or a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEnvelope {
    pub source: String,
    #[serde(rename = "detail-type", default)]
    pub detail_type: Option<String>,
    #[serde(default)]
    pub detail: Value,
}

/// A `(source, detail-type)` pair announcing a rollout start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOrigin {
    pub source: String,
    pub detail_type: String,
}

/// Which envelopes map to which entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub task_source: String,
    pub schedule_source: String,
    pub start_origins: Vec<StartOrigin>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            task_source: "aws.ecs".to_string(),
            schedule_source: "aws.events".to_string(),
            start_origins: vec![StartOrigin {
                source: "rollwatch".to_string(),
                detail_type: "Service Deployment Started".to_string(),
            }],
        }
    }
}

/// Entry point selected for an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Start(DeploymentStarted),
    Progress(TaskStateChange),
    Sweep,
    Ignored,
}

/// Task fields read from an orchestrator state-change detail.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskDetail {
    #[serde(default)]
    started_by: Option<String>,
    desired_status: TaskStatus,
    last_status: TaskStatus,
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct TriggerRouter {
    config: RouterConfig,
}

impl TriggerRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classify an envelope. Unknown origins are `Ignored`; a known origin
    /// with a malformed detail is a validation error.
    pub fn route(&self, envelope: &TriggerEnvelope) -> LifecycleResult<Trigger> {
        let detail_type = envelope.detail_type.as_deref().unwrap_or_default();

        if self.is_start(&envelope.source, detail_type) {
            let started: DeploymentStarted = serde_json::from_value(envelope.detail.clone())
                .map_err(|e| {
                    LifecycleError::Validation(format!("deployment started detail: {e}"))
                })?;
            return Ok(Trigger::Start(started));
        }

        if envelope.source == self.config.task_source {
            let task: TaskDetail = serde_json::from_value(envelope.detail.clone())
                .map_err(|e| LifecycleError::Validation(format!("task state change detail: {e}")))?;
            return Ok(Trigger::Progress(TaskStateChange {
                started_by: task.started_by,
                desired_status: task.desired_status,
                last_status: task.last_status,
                detail: task.detail.map(|detail| Detail::new(detail.to_string())),
            }));
        }

        if envelope.source == self.config.schedule_source {
            return Ok(Trigger::Sweep);
        }

        debug!(source = %envelope.source, %detail_type, "ignoring trigger");
        Ok(Trigger::Ignored)
    }

    fn is_start(&self, source: &str, detail_type: &str) -> bool {
        self.config
            .start_origins
            .iter()
            .any(|origin| origin.source == source && origin.detail_type == detail_type)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(value: Value) -> TriggerEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn routes_deployment_started() {
        let router = TriggerRouter::default();
        let trigger = router
            .route(&envelope(json!({
                "source": "rollwatch",
                "detail-type": "Service Deployment Started",
                "detail": {"cluster": "prod", "service": "api"}
            })))
            .unwrap();

        assert_eq!(
            trigger,
            Trigger::Start(DeploymentStarted {
                cluster: "prod".to_string(),
                service: "api".to_string(),
            })
        );
    }

    #[test]
    fn start_requires_matching_detail_type() {
        let router = TriggerRouter::default();
        let trigger = router
            .route(&envelope(json!({
                "source": "rollwatch",
                "detail-type": "Something Else",
                "detail": {"cluster": "prod", "service": "api"}
            })))
            .unwrap();
        assert_eq!(trigger, Trigger::Ignored);
    }

    #[test]
    fn configured_aliases_route_to_start() {
        let router = TriggerRouter::new(RouterConfig {
            start_origins: vec![
                StartOrigin {
                    source: "tm.ecd".to_string(),
                    detail_type: "ECD Service Deployment Started".to_string(),
                },
                StartOrigin {
                    source: "ci.pipeline".to_string(),
                    detail_type: "Deploy".to_string(),
                },
            ],
            ..Default::default()
        });

        let trigger = router
            .route(&envelope(json!({
                "source": "ci.pipeline",
                "detail-type": "Deploy",
                "detail": {"cluster": "c", "service": "s"}
            })))
            .unwrap();
        assert!(matches!(trigger, Trigger::Start(_)));
    }

    #[test]
    fn task_change_keeps_nested_detail() {
        let router = TriggerRouter::default();
        let trigger = router
            .route(&envelope(json!({
                "source": "aws.ecs",
                "detail-type": "ECS Task State Change",
                "detail": {
                    "startedBy": "ecs-svc/new",
                    "desiredStatus": "RUNNING",
                    "lastStatus": "STOPPED",
                    "taskArn": "t1",
                    "detail": {"reason": "nested"}
                }
            })))
            .unwrap();

        let Trigger::Progress(change) = trigger else {
            panic!("expected progress");
        };
        assert_eq!(change.started_by.as_deref(), Some("ecs-svc/new"));
        assert_eq!(change.last_status, TaskStatus::Stopped);
        let kept: Value = serde_json::from_str(change.detail.unwrap().as_str()).unwrap();
        assert_eq!(kept, json!({"reason": "nested"}));
    }

    #[test]
    fn task_change_without_started_by() {
        let router = TriggerRouter::default();
        let trigger = router
            .route(&envelope(json!({
                "source": "aws.ecs",
                "detail": {"desiredStatus": "RUNNING", "lastStatus": "RUNNING"}
            })))
            .unwrap();

        let Trigger::Progress(change) = trigger else {
            panic!("expected progress");
        };
        assert!(change.started_by.is_none());
        assert!(change.detail.is_none());
    }

    #[test]
    fn schedule_tick_routes_to_sweep() {
        let router = TriggerRouter::default();
        let trigger = router
            .route(&envelope(json!({"source": "aws.events", "detail-type": "Scheduled Event"})))
            .unwrap();
        assert_eq!(trigger, Trigger::Sweep);
    }

    #[test]
    fn unknown_source_is_ignored() {
        let router = TriggerRouter::default();
        let trigger = router
            .route(&envelope(json!({"source": "aws.s3", "detail": {}})))
            .unwrap();
        assert_eq!(trigger, Trigger::Ignored);
    }

    #[test]
    fn malformed_known_detail_is_rejected() {
        let router = TriggerRouter::default();
        let err = router
            .route(&envelope(json!({
                "source": "rollwatch",
                "detail-type": "Service Deployment Started",
                "detail": {"cluster": "prod"}
            })))
            .unwrap_err();
        assert!(err.is_validation());
    }
}
