//! Replay Server - temporal fleet snapshot service
//!
//! Records host and workload snapshots and serves point-in-time fleet views
//! over HTTP.

use anyhow::{Context, Result};
use replay_lib::{
    health::{components, HealthRegistry},
    observability::{ReplayMetrics, StructuredLogger},
    store::{spawn_maintenance_task, MaintenanceStats, MemoryBackend, TreeStore},
    Replayer,
};
use replay_server::{api, config::ServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting replay-server");

    let config = ServerConfig::load()?;
    info!(
        instance = %config.instance_name,
        table = %config.table,
        persistence = ?config.persistence_path,
        "Server configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORE).await;
    health_registry.register(components::BACKEND).await;
    health_registry.register(components::MAINTENANCE).await;

    let metrics = ReplayMetrics::new().context("Failed to register metrics")?;
    let logger = StructuredLogger::new(&config.instance_name);

    let backend = Arc::new(
        MemoryBackend::with_persistence(config.backend_config())
            .context("Failed to open backend")?,
    );
    let store = TreeStore::new(backend.clone(), config.store_config(), metrics.clone());
    let replayer = Replayer::new(store, config.replayer_config(), logger.clone());

    let maintenance = Arc::new(MaintenanceStats::default());
    let (maintenance_cancel, maintenance_handle) = spawn_maintenance_task(
        backend.clone(),
        config.maintenance_config(),
        maintenance.clone(),
        metrics,
        logger.clone(),
    );

    let app_state = Arc::new(api::AppState {
        replayer,
        backend,
        health_registry: health_registry.clone(),
        maintenance,
        sweep_interval: config.sweep_interval(),
        request_timeout: config.request_timeout(),
    });

    logger.log_startup(SERVER_VERSION, &config.table);
    health_registry.set_ready(true).await;

    let shutdown = CancellationToken::new();
    let addr = config.listen_address();
    let api_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { api::serve(&addr, app_state, shutdown).await }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    shutdown.cancel();
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server exited with error"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    // The maintenance task flushes once more before exiting
    maintenance_cancel.cancel();
    if let Err(e) = maintenance_handle.await {
        error!(error = %e, "Maintenance task failed");
    }
    info!("Shutting down");

    Ok(())
}
