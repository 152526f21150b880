//! Subsystem assembly and the periodic sweep loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use rollwatch_cloud::{EventBus, HttpEventBus, HttpOrchestrator, TaskInventory};
use rollwatch_lifecycle::{LifecycleEngine, Notifier, TriggerRouter};
use rollwatch_state::{DeploymentRepository, StateStore};

use crate::api::ApiState;
use crate::config::Config;

/// Open the store and build the engine described by `config`.
pub fn assemble(config: &Config) -> anyhow::Result<ApiState> {
    if let Some(dir) = config.store.path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(&config.store.path)?;
    info!(path = ?config.store.path, "state store opened");

    let orchestrator = HttpOrchestrator::new(&config.orchestrator.endpoint)?;
    let bus = HttpEventBus::new(&config.events.endpoint, config.events.event_bus_name.clone())?;
    info!(
        orchestrator = %config.orchestrator.endpoint,
        events = %config.events.endpoint,
        "clients configured"
    );

    Ok(wire(config, Arc::new(store), TaskInventory::new(Arc::new(orchestrator)), Arc::new(bus)))
}

/// Build handler state from already constructed backends.
pub fn wire(
    config: &Config,
    repository: Arc<dyn DeploymentRepository>,
    inventory: TaskInventory,
    bus: Arc<dyn EventBus>,
) -> ApiState {
    let notifier = Notifier::new(repository.clone(), bus, config.events.source.clone());
    let engine = LifecycleEngine::new(repository.clone(), inventory, notifier)
        .with_expired_threshold(config.sweep.expired_threshold_secs);

    ApiState {
        engine,
        router: TriggerRouter::new(config.router.clone()),
        repository,
    }
}

/// Sweep every `interval` until `shutdown` flips. Failures are logged and
/// the next tick retries.
pub async fn run_sweeper(
    engine: LifecycleEngine,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match engine.sweep().await {
                    Ok(report) => debug!(?report, "periodic sweep"),
                    Err(e) => error!(error = %e, "periodic sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                debug!("sweeper stopping");
                break;
            }
        }
    }
}
