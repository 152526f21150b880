//! Task inventory: aggregated task listings across pages.

use std::sync::Arc;

use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::{Orchestrator, Service, Task, TaskStatus};

/// Paginating facade over an [`Orchestrator`].
#[derive(Clone)]
pub struct TaskInventory {
    orchestrator: Arc<dyn Orchestrator>,
}

impl TaskInventory {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Describe a single service, failing if the orchestrator does not know it.
    pub async fn describe_service(&self, cluster: &str, service: &str) -> OrchestratorResult<Service> {
        let services = self
            .orchestrator
            .describe_services(cluster, &[service])
            .await?;
        services
            .into_iter()
            .find(|s| s.service_name == service)
            .ok_or_else(|| OrchestratorError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            })
    }

    /// All tasks of a service with the given desired status.
    ///
    /// Pages are fetched strictly in sequence, each continuation token
    /// gating the next call. Pages without arns skip the describe call.
    /// Tasks are returned in page order.
    pub async fn list_tasks(
        &self,
        cluster: &str,
        service: &str,
        desired_status: TaskStatus,
    ) -> OrchestratorResult<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .orchestrator
                .list_task_page(cluster, service, &desired_status, token.as_deref())
                .await?;
            pages += 1;

            if !page.task_arns.is_empty() {
                let described = self
                    .orchestrator
                    .describe_tasks(cluster, &page.task_arns)
                    .await?;
                tasks.extend(described);
            }

            match page.next_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        debug!(%cluster, %service, %desired_status, pages, tasks = tasks.len(), "listed tasks");
        Ok(tasks)
    }
}
