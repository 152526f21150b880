//! HTTP surface: trigger intake, manual sweep, record listing.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/triggers` | Route a trigger envelope and run its entry point |
//! | POST | `/api/v1/sweep` | Run a sweep now |
//! | GET | `/api/v1/deployments` | List tracked records |
//! | GET | `/healthz` | Liveness |

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::{error, warn};

use rollwatch_lifecycle::{
    LifecycleEngine, ProgressOutcome, SweepReport, TriggerEnvelope, TriggerOutcome, TriggerRouter,
};
use rollwatch_state::{DeploymentRecord, DeploymentRepository};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: LifecycleEngine,
    pub router: TriggerRouter,
    pub repository: Arc<dyn DeploymentRepository>,
}

pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/triggers", post(handle_trigger))
        .route("/sweep", post(run_sweep))
        .route("/deployments", get(list_deployments))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(healthz))
}

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// What a trigger did.
#[derive(Serialize)]
struct TriggerResponse {
    trigger: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<DeploymentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<ProgressOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sweep: Option<SweepReport>,
}

impl From<TriggerOutcome> for TriggerResponse {
    fn from(outcome: TriggerOutcome) -> Self {
        let mut response = TriggerResponse {
            trigger: outcome.kind(),
            record: None,
            progress: None,
            sweep: None,
        };
        match outcome {
            TriggerOutcome::Started(record) => response.record = Some(record),
            TriggerOutcome::Progress(progress) => response.progress = Some(progress),
            TriggerOutcome::Swept(report) => response.sweep = Some(report),
            TriggerOutcome::Ignored => {}
        }
        response
    }
}

/// POST /api/v1/triggers
///
/// Any failure answers 500 so the sender's retry policy applies.
async fn handle_trigger(
    State(state): State<ApiState>,
    Json(envelope): Json<TriggerEnvelope>,
) -> impl IntoResponse {
    let trigger = match state.router.route(&envelope) {
        Ok(trigger) => trigger,
        Err(e) => {
            warn!(source = %envelope.source, error = %e, "trigger rejected");
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    match state.engine.handle(trigger).await {
        Ok(outcome) => ApiResponse::ok(TriggerResponse::from(outcome)).into_response(),
        Err(e) => {
            error!(source = %envelope.source, error = %e, "trigger failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// POST /api/v1/sweep
async fn run_sweep(State(state): State<ApiState>) -> impl IntoResponse {
    match state.engine.sweep().await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => {
            error!(error = %e, "sweep failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /api/v1/deployments
async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    match state.repository.list_records().await {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /healthz
async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
