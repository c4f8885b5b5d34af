//! Background maintenance for the in-memory backend
//!
//! On every tick the task purges rows past their retention expiry and, when a
//! flush is due, writes the remaining rows to disk. On shutdown it performs a
//! final flush so no acknowledged write is lost.

use super::MemoryBackend;
use crate::observability::{ReplayMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Configuration for the maintenance task
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between passes (default: 60 seconds)
    pub sweep_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Counters shared between the maintenance task and health checks
#[derive(Debug, Default)]
pub struct MaintenanceStats {
    passes: AtomicU64,
    failures: AtomicU64,
    rows_expired: AtomicU64,
    last_pass_failed: AtomicBool,
    last_pass: Mutex<Option<DateTime<Utc>>>,
}

impl MaintenanceStats {
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn rows_expired(&self) -> u64 {
        self.rows_expired.load(Ordering::Relaxed)
    }

    pub fn last_pass_failed(&self) -> bool {
        self.last_pass_failed.load(Ordering::Relaxed)
    }

    /// Completion time of the last pass, successful or not
    pub fn last_pass(&self) -> Option<DateTime<Utc>> {
        *self.last_pass.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, expired: usize, failed: bool) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.rows_expired
            .fetch_add(u64::try_from(expired).unwrap_or(u64::MAX), Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_pass_failed.store(failed, Ordering::Relaxed);
        *self.last_pass.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }
}

/// Spawn the maintenance loop.
///
/// Returns a CancellationToken that stops the task and the task handle, which
/// completes after the final flush.
pub fn spawn_maintenance_task(
    backend: Arc<MemoryBackend>,
    config: MaintenanceConfig,
    stats: Arc<MaintenanceStats>,
    metrics: ReplayMetrics,
    logger: StructuredLogger,
) -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let handle = tokio::spawn(async move {
        let worker = Maintenance {
            backend,
            stats,
            metrics,
            logger,
        };
        worker.run(config, cancel_clone).await;
    });

    (cancel, handle)
}

struct Maintenance {
    backend: Arc<MemoryBackend>,
    stats: Arc<MaintenanceStats>,
    metrics: ReplayMetrics,
    logger: StructuredLogger,
}

impl Maintenance {
    async fn run(&self, config: MaintenanceConfig, cancel: CancellationToken) {
        let mut ticker = interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            interval_secs = config.sweep_interval.as_secs(),
            "Store maintenance task started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Store maintenance task shutting down");
                    if let Err(e) = self.flush(true).await {
                        self.logger.log_maintenance_failure(&e);
                    }
                    break;
                }
                _ = ticker.tick() => {
                    self.pass().await;
                }
            }
        }
    }

    async fn pass(&self) {
        let expired = self.backend.purge_expired(Utc::now().timestamp());
        if expired > 0 {
            self.metrics
                .add_rows_expired(u64::try_from(expired).unwrap_or(u64::MAX));
        }

        match self.flush(false).await {
            Ok(flushed) => {
                self.stats.record(expired, false);
                if expired > 0 || flushed {
                    self.logger.log_maintenance(expired, flushed);
                } else {
                    debug!("Store maintenance: nothing to do");
                }
            }
            Err(e) => {
                self.stats.record(expired, true);
                self.logger.log_maintenance_failure(&e);
            }
        }
    }

    /// Flush on the blocking pool; `force` ignores the flush interval
    async fn flush(&self, force: bool) -> Result<bool, String> {
        if !force && !self.backend.should_flush() {
            return Ok(false);
        }
        if self.backend.config().persistence_path.is_none() {
            return Ok(false);
        }

        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || backend.flush())
            .await
            .map_err(|e| format!("flush task panicked: {e}"))?
            .map_err(|e| format!("{e:#}"))?;
        Ok(true)
    }
}
