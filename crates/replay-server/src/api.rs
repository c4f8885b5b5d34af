//! HTTP API for ingestion, fleet queries, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use replay_lib::{
    health::{ComponentStatus, HealthRegistry},
    store::{MaintenanceStats, MemoryBackend, RequestContext},
    HostObservation, ReplayError, ReplayMetrics, Replayer, WorkloadObservation,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub replayer: Replayer,
    pub backend: Arc<MemoryBackend>,
    pub health_registry: HealthRegistry,
    pub maintenance: Arc<MaintenanceStats>,
    pub sweep_interval: Duration,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn metrics(&self) -> &ReplayMetrics {
        self.replayer.store().metrics()
    }

    /// Context for one request: the configured deadline
    fn request_context(&self) -> RequestContext {
        RequestContext::background().timeout(self.request_timeout)
    }

    /// Run a store-backed call and fold its outcome into store health
    async fn call<T, F>(&self, fut: F) -> Result<T, ApiError>
    where
        F: Future<Output = replay_lib::Result<T>>,
    {
        let result = fut.await;
        self.health_registry
            .record_store_outcome(result.as_ref().map(|_| ()))
            .await;
        result.map_err(ApiError)
    }

    async fn refresh_health(&self) {
        self.health_registry.check_backend(&self.backend).await;
        self.health_registry
            .check_maintenance(&self.maintenance, self.sweep_interval)
            .await;
    }
}

/// A [`ReplayError`] rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub ReplayError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ReplayError::Validation(_) => StatusCode::BAD_REQUEST,
            ReplayError::NotFound(_) => StatusCode::NOT_FOUND,
            ReplayError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            ReplayError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "Request failed");
        }
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AtQuery {
    /// Defaults to now
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct IntervalQuery {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval_secs: i64,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.refresh_health().await;
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.refresh_health().await;
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics().registry().gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn record_host(
    State(state): State<Arc<AppState>>,
    Json(observation): Json<HostObservation>,
) -> Result<StatusCode, ApiError> {
    let ctx = state.request_context();
    state
        .call(state.replayer.record_host_snapshot(&ctx, observation))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn record_workloads(
    State(state): State<Arc<AppState>>,
    Json(observations): Json<Vec<WorkloadObservation>>,
) -> Result<StatusCode, ApiError> {
    let ctx = state.request_context();
    state
        .call(state.replayer.record_workload_snapshots(&ctx, observations))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let host = state.call(state.replayer.host(&ctx, &host_id)).await?;
    Ok(Json(host))
}

async fn fleet_at(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AtQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let at = query.at.unwrap_or_else(Utc::now);
    let view = state.call(state.replayer.effective_at(&ctx, at)).await?;
    Ok(Json(view))
}

async fn fleet_eventful(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let views = state
        .call(state.replayer.eventful_snapshots(&ctx, query.begin, query.end))
        .await?;
    Ok(Json(views))
}

async fn fleet_interval(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IntervalQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state.request_context();
    let views = state
        .call(state.replayer.interval_snapshots(
            &ctx,
            query.begin,
            query.end,
            query.interval_secs,
        ))
        .await?;
    Ok(Json(views))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/hosts", post(record_host))
        .route("/api/v1/hosts/:host_id", get(get_host))
        .route("/api/v1/workloads", post(record_workloads))
        .route("/api/v1/fleet", get(fleet_at))
        .route("/api/v1/fleet/eventful", get(fleet_eventful))
        .route("/api/v1/fleet/interval", get(fleet_interval))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` is cancelled
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
