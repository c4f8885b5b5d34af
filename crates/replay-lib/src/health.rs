//! Health check infrastructure for the replay service
//!
//! Tracks the store, the backend and the maintenance task for liveness and
//! readiness probes. Component state is derived from what the service
//! already observes: store call outcomes, backend availability and
//! maintenance pass recency.

use crate::error::ReplayError;
use crate::store::{MaintenanceStats, MemoryBackend};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, but recent operations failed
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; empty means healthy
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const STORE: &str = "store";
    pub const BACKEND: &str = "backend";
    pub const MAINTENANCE: &str = "maintenance";
}

/// Passes missed before maintenance is reported stalled
const STALLED_AFTER_PASSES: u32 = 3;

/// Health registry for tracking component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Fold a store call outcome into the store component.
    ///
    /// Only backend-side failures count against the store; bad input,
    /// missing hosts and caller cancellation say nothing about its health.
    pub async fn record_store_outcome(&self, outcome: Result<(), &ReplayError>) {
        let health = match outcome {
            Ok(()) => ComponentHealth::healthy(),
            Err(err @ ReplayError::Store { .. }) => {
                ComponentHealth::degraded(format!("last store operation failed: {err}"))
            }
            Err(_) => return,
        };
        self.update(components::STORE, health).await;
    }

    /// Refresh the backend component from the backend's state
    pub async fn check_backend(&self, backend: &MemoryBackend) {
        let health = if backend.is_offline() {
            ComponentHealth::unhealthy("backend unavailable")
        } else {
            ComponentHealth::healthy()
        };
        self.update(components::BACKEND, health).await;
    }

    /// Refresh the maintenance component from its shared counters
    pub async fn check_maintenance(&self, stats: &MaintenanceStats, sweep_interval: Duration) {
        let stalled_after = sweep_interval.saturating_mul(STALLED_AFTER_PASSES);
        let since_last = stats
            .last_pass()
            .and_then(|at| (Utc::now() - at).to_std().ok());

        let health = match since_last {
            Some(elapsed) if elapsed > stalled_after => ComponentHealth::degraded(format!(
                "no maintenance pass for {}s",
                elapsed.as_secs()
            )),
            _ if stats.last_pass_failed() => ComponentHealth::degraded(format!(
                "last maintenance pass failed ({} failures total)",
                stats.failures()
            )),
            _ => ComponentHealth::healthy(),
        };
        self.update(components::MAINTENANCE, health).await;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Replay service not yet initialized".to_string())
        } else if !health.status.is_operational() {
            let failing: Vec<&str> = health
                .components
                .iter()
                .filter(|(_, c)| !c.status.is_operational())
                .map(|(name, _)| name.as_str())
                .collect();
            Some(format!("Unhealthy components: {}", failing.join(", ")))
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
