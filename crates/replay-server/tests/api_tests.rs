//! Integration tests for the replay server API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use replay_lib::{
    health::{components, HealthRegistry},
    observability::{ReplayMetrics, StructuredLogger},
    store::{MaintenanceStats, MemoryBackend, StoreConfig, TreeStore},
    Replayer, ReplayerConfig,
};
use replay_server::api::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::BACKEND).await;
    health_registry.register(components::MAINTENANCE).await;

    let backend = Arc::new(MemoryBackend::default());
    let store = TreeStore::new(
        backend.clone(),
        StoreConfig::default(),
        ReplayMetrics::new().unwrap(),
    );
    let replayer = Replayer::new(
        store,
        ReplayerConfig::default(),
        StructuredLogger::new("test"),
    );

    let state = Arc::new(AppState {
        replayer,
        backend,
        health_registry,
        maintenance: Arc::new(MaintenanceStats::default()),
        sweep_interval: Duration::from_secs(60),
        request_timeout: Duration::from_secs(5),
    });
    (create_router(state.clone()), state)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn host_observation(timestamp: &str, condition: &str) -> Value {
    json!({
        "host_id": "h1",
        "attributes": { "name": "node-a", "kernel_version": "6.1.0" },
        "snapshot": { "timestamp": timestamp, "condition": condition }
    })
}

async fn seed(app: &Router) {
    for (ts, condition) in [
        ("1970-01-01T00:00:10Z", "Ready"),
        ("1970-01-01T00:00:20Z", "NotReady"),
    ] {
        let (status, _) = send(app, post_json("/api/v1/hosts", host_observation(ts, condition))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let workloads = json!([{
        "host_id": "h1",
        "workload_id": "w1",
        "attributes": { "name": "web", "namespace": "default" },
        "snapshot": { "timestamp": "1970-01-01T00:00:12Z", "phase": "Running" }
    }]);
    let (status, _) = send(app, post_json("/api/v1/workloads", workloads)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = send(&app, get("/healthz")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"].get(components::BACKEND).is_some());
}

#[tokio::test]
async fn test_healthz_returns_503_when_backend_offline() {
    let (app, state) = setup_test_app().await;
    state.backend.go_offline();

    let (status, health) = send(&app, get("/healthz")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["components"]["backend"]["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_tracks_initialization() {
    let (app, state) = setup_test_app().await;

    let (status, _) = send(&app, get("/readyz")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    state.health_registry.set_ready(true).await;
    let (status, readiness) = send(&app, get("/readyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_fleet_at_resolves_effective_snapshots() {
    let (app, _state) = setup_test_app().await;
    seed(&app).await;

    let (status, view) = send(&app, get("/api/v1/fleet?at=1970-01-01T00:00:15Z")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["hosts"][0]["host_id"], "h1");
    assert_eq!(view["hosts"][0]["snapshot"]["condition"], "Ready");
    assert_eq!(view["hosts"][0]["workloads"][0]["workload_id"], "w1");
    assert_eq!(view["omitted_hosts"], 0);

    let (_, early) = send(&app, get("/api/v1/fleet?at=1970-01-01T00:00:05Z")).await;
    assert_eq!(early["hosts"].as_array().unwrap().len(), 0);
    assert_eq!(early["omitted_hosts"], 1);
}

#[tokio::test]
async fn test_fleet_eventful_returns_view_per_change() {
    let (app, _state) = setup_test_app().await;
    seed(&app).await;

    let (status, views) = send(
        &app,
        get("/api/v1/fleet/eventful?begin=1970-01-01T00:00:00Z&end=1970-01-01T00:00:30Z"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let times: Vec<&str> = views
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["timestamp"].as_str().unwrap())
        .collect();
    assert_eq!(
        times,
        vec![
            "1970-01-01T00:00:10Z",
            "1970-01-01T00:00:12Z",
            "1970-01-01T00:00:20Z"
        ]
    );
}

#[tokio::test]
async fn test_fleet_interval_validates_step() {
    let (app, _state) = setup_test_app().await;
    seed(&app).await;

    let (status, views) = send(
        &app,
        get("/api/v1/fleet/interval?begin=1970-01-01T00:00:00Z&end=1970-01-01T00:00:20Z&interval_secs=10"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(views.as_array().unwrap().len(), 3);

    let (status, error) = send(
        &app,
        get("/api/v1/fleet/interval?begin=1970-01-01T00:00:00Z&end=1970-01-01T00:00:20Z&interval_secs=0"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation");
}

#[tokio::test]
async fn test_get_host_returns_tree_or_404() {
    let (app, _state) = setup_test_app().await;
    seed(&app).await;

    let (status, host) = send(&app, get("/api/v1/hosts/h1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(host["attributes"]["kernel_version"], "6.1.0");
    assert_eq!(host["history"].as_array().unwrap().len(), 2);
    assert_eq!(host["workloads"][0]["attributes"]["namespace"], "default");

    let (status, error) = send(&app, get("/api/v1/hosts/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"], "not_found");
}

#[tokio::test]
async fn test_invalid_observation_is_bad_request() {
    let (app, _state) = setup_test_app().await;

    let (status, error) = send(
        &app,
        post_json(
            "/api/v1/hosts",
            json!({
                "host_id": "",
                "snapshot": { "timestamp": "1970-01-01T00:00:10Z", "condition": "Ready" }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation");
}

#[tokio::test]
async fn test_backend_outage_is_500_and_degrades_store() {
    let (app, state) = setup_test_app().await;
    state.backend.go_offline();

    let (status, error) = send(&app, get("/api/v1/fleet?at=1970-01-01T00:00:15Z")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error["error"], "store");

    let health = state.health_registry.health().await;
    assert_eq!(
        health.components[components::STORE].status,
        replay_lib::ComponentStatus::Degraded
    );
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;
    seed(&app).await;
    send(&app, get("/api/v1/fleet?at=1970-01-01T00:00:15Z")).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("fleet_replay_rows_written_total"));
    assert!(metrics_text.contains("fleet_replay_fleet_views_built_total 1"));
    assert!(metrics_text.contains("fleet_replay_store_latency_seconds_bucket"));
}
