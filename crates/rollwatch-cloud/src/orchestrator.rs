//! Orchestrator API: service descriptions and task listings.
//!
//! [`Orchestrator`] exposes one method per API call so that pagination and
//! aggregation live in [`crate::TaskInventory`], independent of transport.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorResult, TransportError};
use crate::transport::JsonTransport;

const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";

// ── Types ──────────────────────────────────────────────────────────

/// A service as described by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub service_name: String,
    #[serde(default)]
    pub desired_count: u32,
    /// Rollout descriptors, one per task definition revision in play.
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
}

impl Service {
    /// Rollouts tagged with `status`.
    pub fn deployments_with_status(&self, status: &DeploymentStatus) -> Vec<&ServiceDeployment> {
        self.deployments
            .iter()
            .filter(|d| &d.status == status)
            .collect()
    }
}

/// One rollout of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeployment {
    pub id: String,
    pub status: DeploymentStatus,
}

/// Role of a rollout within its service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// The rollout being ramped up.
    Primary,
    /// A rollout being drained.
    Active,
    Inactive,
    #[serde(untagged)]
    Other(String),
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task, tagged with the rollout that started it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_status: Option<TaskStatus>,
}

/// Task lifecycle status as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
    Deleted,
    #[serde(untagged)]
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Pending => "PENDING",
            Self::Activating => "ACTIVATING",
            Self::Running => "RUNNING",
            Self::Deactivating => "DEACTIVATING",
            Self::Stopping => "STOPPING",
            Self::Deprovisioning => "DEPROVISIONING",
            Self::Stopped => "STOPPED",
            Self::Deleted => "DELETED",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a task listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    #[serde(default)]
    pub task_arns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

// ── Trait ──────────────────────────────────────────────────────────

/// Raw orchestrator API.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Describe services of a cluster by name.
    async fn describe_services(
        &self,
        cluster: &str,
        services: &[&str],
    ) -> OrchestratorResult<Vec<Service>>;

    /// Fetch one page of task arns for a service.
    async fn list_task_page(
        &self,
        cluster: &str,
        service: &str,
        desired_status: &TaskStatus,
        next_token: Option<&str>,
    ) -> OrchestratorResult<TaskPage>;

    /// Describe tasks by arn. Callers never pass an empty slice.
    async fn describe_tasks(&self, cluster: &str, task_arns: &[String])
    -> OrchestratorResult<Vec<Task>>;
}

// ── HTTP implementation ────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeServicesRequest<'a> {
    cluster: &'a str,
    services: &'a [&'a str],
}

#[derive(Deserialize)]
struct DescribeServicesResponse {
    #[serde(default)]
    services: Vec<Service>,
    #[serde(default)]
    failures: Vec<Failure>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListTasksRequest<'a> {
    cluster: &'a str,
    service_name: &'a str,
    desired_status: &'a TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Serialize)]
struct DescribeTasksRequest<'a> {
    cluster: &'a str,
    tasks: &'a [String],
}

#[derive(Deserialize)]
struct DescribeTasksResponse {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    failures: Vec<Failure>,
}

#[derive(Debug, Deserialize)]
struct Failure {
    #[serde(default)]
    arn: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// [`Orchestrator`] speaking the ECS JSON 1.1 protocol.
#[derive(Clone)]
pub struct HttpOrchestrator {
    transport: JsonTransport,
}

impl HttpOrchestrator {
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            transport: JsonTransport::new(endpoint)?,
        })
    }

    fn target(operation: &str) -> String {
        format!("{TARGET_PREFIX}.{operation}")
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn describe_services(
        &self,
        cluster: &str,
        services: &[&str],
    ) -> OrchestratorResult<Vec<Service>> {
        let request = DescribeServicesRequest { cluster, services };
        let response: DescribeServicesResponse = self
            .transport
            .call(&Self::target("DescribeServices"), &request)
            .await?;
        for failure in &response.failures {
            debug!(%cluster, arn = ?failure.arn, reason = ?failure.reason, "describe services failure");
        }
        Ok(response.services)
    }

    async fn list_task_page(
        &self,
        cluster: &str,
        service: &str,
        desired_status: &TaskStatus,
        next_token: Option<&str>,
    ) -> OrchestratorResult<TaskPage> {
        let request = ListTasksRequest {
            cluster,
            service_name: service,
            desired_status,
            next_token,
        };
        Ok(self
            .transport
            .call(&Self::target("ListTasks"), &request)
            .await?)
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> OrchestratorResult<Vec<Task>> {
        let request = DescribeTasksRequest {
            cluster,
            tasks: task_arns,
        };
        let response: DescribeTasksResponse = self
            .transport
            .call(&Self::target("DescribeTasks"), &request)
            .await?;
        // Tasks can vanish between list and describe; they simply drop out.
        for failure in &response.failures {
            debug!(%cluster, arn = ?failure.arn, reason = ?failure.reason, "describe tasks failure");
        }
        Ok(response.tasks)
    }
}
