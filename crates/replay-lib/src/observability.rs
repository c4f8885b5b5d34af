//! Observability infrastructure for the replay store
//!
//! Provides:
//! - Prometheus metrics (store latency, rows written, partial writes, views built)
//! - Structured JSON logging with tracing

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Inner metrics structure that holds the actual Prometheus metrics
struct ReplayMetricsInner {
    registry: Registry,
    store_latency_seconds: HistogramVec,
    store_errors: IntCounterVec,
    rows_written: IntCounter,
    partial_writes: IntCounter,
    fleet_views_built: IntCounter,
    omitted_entities: IntCounterVec,
    rows_expired: IntCounter,
    hosts_tracked: IntGauge,
}

impl ReplayMetricsInner {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let store_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fleet_replay_store_latency_seconds",
                "Time spent in snapshot store operations",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;
        let store_errors = IntCounterVec::new(
            Opts::new(
                "fleet_replay_store_errors_total",
                "Failed snapshot store operations",
            ),
            &["operation", "kind"],
        )?;
        let rows_written = IntCounter::new(
            "fleet_replay_rows_written_total",
            "Rows acknowledged by the backing store",
        )?;
        let partial_writes = IntCounter::new(
            "fleet_replay_partial_writes_total",
            "Batch writes whose persisted count differed from the submitted count",
        )?;
        let fleet_views_built = IntCounter::new(
            "fleet_replay_fleet_views_built_total",
            "Point-in-time fleet views assembled",
        )?;
        let omitted_entities = IntCounterVec::new(
            Opts::new(
                "fleet_replay_omitted_entities_total",
                "Entities left out of a fleet view for lack of an effective snapshot",
            ),
            &["entity"],
        )?;
        let rows_expired = IntCounter::new(
            "fleet_replay_rows_expired_total",
            "Rows purged after their retention expiry",
        )?;
        let hosts_tracked = IntGauge::new(
            "fleet_replay_hosts_tracked",
            "Hosts returned by the last full fleet read",
        )?;

        registry.register(Box::new(store_latency_seconds.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(rows_written.clone()))?;
        registry.register(Box::new(partial_writes.clone()))?;
        registry.register(Box::new(fleet_views_built.clone()))?;
        registry.register(Box::new(omitted_entities.clone()))?;
        registry.register(Box::new(rows_expired.clone()))?;
        registry.register(Box::new(hosts_tracked.clone()))?;

        Ok(Self {
            registry,
            store_latency_seconds,
            store_errors,
            rows_written,
            partial_writes,
            fleet_views_built,
            omitted_entities,
            rows_expired,
            hosts_tracked,
        })
    }
}

/// Replay metrics for Prometheus exposition
///
/// Each handle owns its registry, so independent stores (and tests) never
/// collide on metric names. Clones share the same underlying metrics.
#[derive(Clone)]
pub struct ReplayMetrics {
    inner: Arc<ReplayMetricsInner>,
}

impl ReplayMetrics {
    /// Create a metrics handle with a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            inner: Arc::new(ReplayMetricsInner::new()?),
        })
    }

    /// Registry to gather from when serving `/metrics`
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a store operation latency observation
    pub fn observe_store_latency(&self, operation: &str, duration_secs: f64) {
        self.inner
            .store_latency_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Count a failed store operation
    pub fn inc_store_errors(&self, operation: &str, kind: &str) {
        self.inner
            .store_errors
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn add_rows_written(&self, rows: u64) {
        self.inner.rows_written.inc_by(rows);
    }

    pub fn inc_partial_writes(&self) {
        self.inner.partial_writes.inc();
    }

    pub fn inc_fleet_views_built(&self) {
        self.inner.fleet_views_built.inc();
    }

    /// Count entities omitted from a view (`entity` is "host" or "workload")
    pub fn add_omitted(&self, entity: &str, count: u64) {
        if count > 0 {
            self.inner
                .omitted_entities
                .with_label_values(&[entity])
                .inc_by(count);
        }
    }

    pub fn add_rows_expired(&self, rows: u64) {
        self.inner.rows_expired.inc_by(rows);
    }

    pub fn set_hosts_tracked(&self, hosts: i64) {
        self.inner.hosts_tracked.set(hosts);
    }

    pub fn rows_written(&self) -> u64 {
        self.inner.rows_written.get()
    }

    pub fn partial_writes(&self) -> u64 {
        self.inner.partial_writes.get()
    }

    pub fn fleet_views_built(&self) -> u64 {
        self.inner.fleet_views_built.get()
    }

    pub fn omitted(&self, entity: &str) -> u64 {
        self.inner
            .omitted_entities
            .with_label_values(&[entity])
            .get()
    }
}

/// Structured logger for replay events
///
/// Provides consistent JSON-formatted logging for ingestion, view assembly,
/// and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a recorded host observation
    pub fn log_host_snapshot(&self, host_id: &str, timestamp: &str, workloads: usize) {
        info!(
            event = "host_snapshot_recorded",
            instance = %self.instance,
            host_id = %host_id,
            timestamp = %timestamp,
            workloads = workloads,
            "Recorded host snapshot"
        );
    }

    /// Log a batch of recorded workload observations
    pub fn log_workload_snapshots(&self, hosts: usize, workloads: usize) {
        info!(
            event = "workload_snapshots_recorded",
            instance = %self.instance,
            hosts = hosts,
            workloads = workloads,
            "Recorded workload snapshots"
        );
    }

    /// Log an assembled fleet view
    pub fn log_fleet_view(
        &self,
        timestamp: &str,
        hosts: usize,
        workloads: usize,
        omitted_hosts: usize,
        omitted_workloads: usize,
    ) {
        if omitted_hosts > 0 || omitted_workloads > 0 {
            info!(
                event = "fleet_view_built",
                instance = %self.instance,
                timestamp = %timestamp,
                hosts = hosts,
                workloads = workloads,
                omitted_hosts = omitted_hosts,
                omitted_workloads = omitted_workloads,
                "Built fleet view with entities lacking an effective snapshot"
            );
        } else {
            tracing::debug!(
                event = "fleet_view_built",
                instance = %self.instance,
                timestamp = %timestamp,
                hosts = hosts,
                workloads = workloads,
                "Built fleet view"
            );
        }
    }

    /// Log a maintenance pass
    pub fn log_maintenance(&self, expired: usize, flushed: bool) {
        info!(
            event = "maintenance_pass",
            instance = %self.instance,
            expired_rows = expired,
            flushed = flushed,
            "Store maintenance pass complete"
        );
    }

    /// Log a failed maintenance pass
    pub fn log_maintenance_failure(&self, error: &str) {
        warn!(
            event = "maintenance_failed",
            instance = %self.instance,
            error = %error,
            "Store maintenance pass failed"
        );
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, table: &str) {
        info!(
            event = "replay_started",
            instance = %self.instance,
            version = %version,
            table = %table,
            "Fleet replay service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "replay_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Fleet replay service shutting down"
        );
    }
}
