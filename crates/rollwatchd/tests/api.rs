//! HTTP surface tests.
//!
//! Drive the axum router with `oneshot` against an in-memory store, an
//! in-memory event bus and a scripted orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use rollwatch_cloud::*;
use rollwatch_state::{RecordKey, RecordPatch, StateStore};
use rollwatchd::api::build_router;
use rollwatchd::config::Config;
use rollwatchd::daemon::wire;

/// Orchestrator with one service mid-rollout and no running tasks.
struct OneService;

#[async_trait]
impl Orchestrator for OneService {
    async fn describe_services(
        &self,
        _cluster: &str,
        services: &[&str],
    ) -> OrchestratorResult<Vec<Service>> {
        if !services.contains(&"api") {
            return Ok(Vec::new());
        }
        Ok(vec![Service {
            service_name: "api".to_string(),
            desired_count: 2,
            deployments: vec![
                ServiceDeployment {
                    id: "ecs-svc/new".to_string(),
                    status: DeploymentStatus::Primary,
                },
                ServiceDeployment {
                    id: "ecs-svc/old".to_string(),
                    status: DeploymentStatus::Active,
                },
            ],
        }])
    }

    async fn list_task_page(
        &self,
        _cluster: &str,
        _service: &str,
        _desired_status: &TaskStatus,
        _next_token: Option<&str>,
    ) -> OrchestratorResult<TaskPage> {
        Ok(TaskPage::default())
    }

    async fn describe_tasks(
        &self,
        _cluster: &str,
        _task_arns: &[String],
    ) -> OrchestratorResult<Vec<Task>> {
        Ok(Vec::new())
    }
}

struct TestApp {
    router: axum::Router,
    store: StateStore,
    bus: MemoryEventBus,
}

fn test_app() -> TestApp {
    let store = StateStore::open_in_memory().unwrap();
    let bus = MemoryEventBus::new();
    let state = wire(
        &Config::default(),
        Arc::new(store.clone()),
        TaskInventory::new(Arc::new(OneService)),
        Arc::new(bus.clone()),
    );
    TestApp {
        router: build_router(state),
        store,
        bus,
    }
}

async fn post_json(router: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, req).await
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, req).await
}

async fn send(router: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn healthz() {
    let app = test_app();
    let (status, body) = get(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn start_trigger_creates_record() {
    let app = test_app();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/triggers",
        json!({
            "source": "rollwatch",
            "detail-type": "Service Deployment Started",
            "detail": {"cluster": "prod", "service": "api"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trigger"], "start");
    assert_eq!(body["data"]["record"]["deployment"], "ecs-svc/new");

    let (status, body) = get(&app.router, "/api/v1/deployments").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], "prod,api");
}

#[tokio::test]
async fn progress_trigger_reports_outcome() {
    let app = test_app();
    app.store
        .update_record(
            &RecordKey::new("prod", "api"),
            RecordPatch::begin("ecs-svc/new", "ecs-svc/old", 1000),
        )
        .unwrap();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/triggers",
        json!({
            "source": "aws.ecs",
            "detail-type": "ECS Task State Change",
            "detail": {"startedBy": "ecs-svc/new", "desiredStatus": "RUNNING", "lastStatus": "STOPPED"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trigger"], "progress");
    assert_eq!(body["data"]["progress"]["finished"], "failed");
}

#[tokio::test]
async fn unknown_trigger_is_acknowledged() {
    let app = test_app();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/triggers",
        json!({"source": "aws.s3", "detail-type": "Object Created", "detail": {}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trigger"], "ignored");
}

#[tokio::test]
async fn failing_start_answers_500() {
    let app = test_app();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/triggers",
        json!({
            "source": "rollwatch",
            "detail-type": "Service Deployment Started",
            "detail": {"cluster": "prod", "service": "missing"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("missing"));
    assert!(app.store.all_records().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_detail_answers_500() {
    let app = test_app();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/triggers",
        json!({"source": "aws.ecs", "detail": {"startedBy": "x"}}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().starts_with("validation"));
}

#[tokio::test]
async fn sweep_endpoint_reports_counts() {
    let app = test_app();
    app.store
        .update_record(
            &RecordKey::new("prod", "api"),
            RecordPatch::begin("ecs-svc/new", "ecs-svc/old", 0),
        )
        .unwrap();

    let (status, body) = post_json(&app.router, "/api/v1/sweep", json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({"succeeded": 0, "failed": 0, "hanging": 1})
    );
    assert_eq!(app.bus.published().len(), 1);
    assert!(app.store.all_records().unwrap().is_empty());
}

#[tokio::test]
async fn scheduled_trigger_sweeps() {
    let app = test_app();

    let (status, body) = post_json(
        &app.router,
        "/api/v1/triggers",
        json!({"source": "aws.events", "detail-type": "Scheduled Event", "detail": {}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["trigger"], "sweep");
    assert_eq!(body["data"]["sweep"]["hanging"], 0);
}
