//! Lifecycle notifier: publish a terminal event and drop the record.
//!
//! Each notification performs two independent effects, deleting the record
//! and publishing the event. Both are always attempted; the call fails if
//! either one does. There is no compensation, so a partial failure leaves
//! the store and the bus diverged and is logged at error level.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value, json};
use tracing::{error, info};

use rollwatch_cloud::{DetailType, EventBus, LifecycleEvent};
use rollwatch_state::{DeploymentRepository, DeploymentRecord, Detail};

use crate::error::{LifecycleError, LifecycleResult};

#[derive(Clone)]
pub struct Notifier {
    repository: Arc<dyn DeploymentRepository>,
    bus: Arc<dyn EventBus>,
    source: String,
}

impl Notifier {
    pub fn new(
        repository: Arc<dyn DeploymentRepository>,
        bus: Arc<dyn EventBus>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            bus,
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// The rollout completed.
    pub async fn succeeded(&self, record: &DeploymentRecord) -> LifecycleResult<()> {
        let body = record_body(record)?;
        self.dispatch(record, DetailType::DeploymentSucceeded, Value::Object(body))
            .await
    }

    /// The rollout failed; `detail` is the orchestrator payload that ended it.
    pub async fn failed(
        &self,
        record: &DeploymentRecord,
        detail: Option<&Detail>,
    ) -> LifecycleResult<()> {
        let mut body = record_body(record)?;
        body.insert("detail".to_string(), embed_detail(detail));
        self.dispatch(record, DetailType::DeploymentFailed, Value::Object(body))
            .await
    }

    /// The rollout stopped reporting progress.
    pub async fn hanging(&self, record: &DeploymentRecord) -> LifecycleResult<()> {
        let body = json!({
            "cluster": record.cluster,
            "service": record.service,
            "deployment": record.deployment,
            "last_updated_at": format_timestamp(record.last_updated_at),
        });
        self.dispatch(record, DetailType::DeploymentHanging, body)
            .await
    }

    async fn dispatch(
        &self,
        record: &DeploymentRecord,
        detail_type: DetailType,
        body: Value,
    ) -> LifecycleResult<()> {
        let event = LifecycleEvent {
            source: self.source.clone(),
            detail_type,
            detail: body.to_string(),
        };
        let key = record.key();

        let (deleted, published) = tokio::join!(
            self.repository.delete(&key),
            self.bus.publish(&event)
        );

        match (deleted, published) {
            (Ok(_), Ok(())) => {
                info!(id = %record.id, %detail_type, "lifecycle event dispatched");
                Ok(())
            }
            (Err(store), Ok(())) => {
                error!(id = %record.id, %detail_type, error = %store, "event published but record not deleted");
                Err(store.into())
            }
            (Ok(_), Err(bus)) => {
                error!(id = %record.id, %detail_type, error = %bus, "record deleted but event not published");
                Err(bus.into())
            }
            (Err(store), Err(bus)) => {
                error!(id = %record.id, %detail_type, store_error = %store, bus_error = %bus, "notification failed");
                Err(store.into())
            }
        }
    }
}

/// The record as an event body, without the storage id or the raw
/// finished detail.
fn record_body(record: &DeploymentRecord) -> LifecycleResult<Map<String, Value>> {
    match serde_json::to_value(record) {
        Ok(Value::Object(mut map)) => {
            map.remove("id");
            map.remove("finished_detail");
            Ok(map)
        }
        Ok(other) => Err(LifecycleError::Serialize(format!(
            "record {} serialized to {other}",
            record.id
        ))),
        Err(e) => Err(LifecycleError::Serialize(e.to_string())),
    }
}

/// Embed an opaque detail payload as JSON. Text that is not valid JSON is
/// carried as a string; a missing detail becomes an empty object.
fn embed_detail(detail: Option<&Detail>) -> Value {
    match detail {
        Some(detail) => serde_json::from_str(detail.as_str())
            .unwrap_or_else(|_| Value::String(detail.as_str().to_string())),
        None => Value::Object(Map::new()),
    }
}

/// Render epoch seconds as an RFC 3339 UTC timestamp. Values chrono cannot
/// represent are passed through as the raw number.
fn format_timestamp(secs: u64) -> Value {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|at| Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, false)))
        .unwrap_or_else(|| Value::from(secs))
}
