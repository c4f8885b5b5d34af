//! Server configuration

use anyhow::{ensure, Context, Result};
use replay_lib::store::{MaintenanceConfig, MemoryBackendConfig, StoreConfig};
use replay_lib::ReplayerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional config file
pub const CONFIG_FILE_ENV: &str = "REPLAY_CONFIG";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Instance name used in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// API server port for ingest, queries, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Namespace (table) name
    #[serde(default = "default_table")]
    pub table: String,

    /// Row retention in days
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Rows per batch write
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Cap on views returned by eventful and interval queries
    #[serde(default = "default_max_views_per_query")]
    pub max_views_per_query: usize,

    /// Deadline applied to every API request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// JSON file the in-memory backend persists to; memory only when unset
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Interval between expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "replay-0".to_string())
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_table() -> String {
    "fleet".to_string()
}

fn default_retention_days() -> u64 {
    90
}

fn default_max_batch_size() -> usize {
    25
}

fn default_max_views_per_query() -> usize {
    10_000
}

/// Upper bound on the per-request timeout (one day)
const MAX_REQUEST_TIMEOUT_SECS: u64 = 86_400;

fn default_request_timeout() -> u64 {
    30
}

fn default_flush_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

impl ServerConfig {
    /// Load configuration from the `REPLAY_CONFIG` file (if set) and
    /// `REPLAY_*` environment variables
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load configuration from an optional file, overridden by environment
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: ServerConfig = builder
            .add_source(config::Environment::with_prefix("REPLAY"))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.table.is_empty(), "table must not be empty");
        ensure!(self.retention_days > 0, "retention_days must be positive");
        ensure!(self.max_batch_size > 0, "max_batch_size must be positive");
        ensure!(
            self.max_views_per_query > 0,
            "max_views_per_query must be positive"
        );
        ensure!(
            self.request_timeout_secs > 0 && self.request_timeout_secs <= MAX_REQUEST_TIMEOUT_SECS,
            "request_timeout_secs must be between 1 and {MAX_REQUEST_TIMEOUT_SECS}"
        );
        ensure!(
            self.sweep_interval_secs > 0,
            "sweep_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            table: self.table.clone(),
            retention: Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60)),
            max_batch_size: self.max_batch_size,
        }
    }

    pub fn replayer_config(&self) -> ReplayerConfig {
        ReplayerConfig {
            max_views_per_query: self.max_views_per_query,
        }
    }

    pub fn backend_config(&self) -> MemoryBackendConfig {
        MemoryBackendConfig {
            max_batch_size: self.max_batch_size,
            persistence_path: self.persistence_path.clone(),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            sweep_interval: self.sweep_interval(),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.api_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            bind_address: default_bind_address(),
            api_port: default_api_port(),
            table: default_table(),
            retention_days: default_retention_days(),
            max_batch_size: default_max_batch_size(),
            max_views_per_query: default_max_views_per_query(),
            request_timeout_secs: default_request_timeout(),
            persistence_path: None,
            flush_interval_secs: default_flush_interval(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}
