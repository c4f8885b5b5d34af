//! Snapshot store over a flat key-value namespace
//!
//! This module provides:
//! - The [`KvBackend`] seam to the backing key-value service
//! - Row encoding of host/workload trees into kind-tagged flat rows
//! - [`TreeStore`], which writes trees with chunked, count-verified batches
//!   and reconstructs them from an owner-index query
//! - An in-memory backend with optional disk persistence and TTL purge
//! - A background task that purges expired rows and flushes to disk

mod context;
mod maintenance;
mod memory;
mod rows;
mod tree;


pub use context::RequestContext;
pub use maintenance::{spawn_maintenance_task, MaintenanceConfig, MaintenanceStats};
pub use memory::{MemoryBackend, MemoryBackendConfig};
pub use rows::{RowKind, RowPayload, ROOT_PATH};
pub use tree::{StoreConfig, TreeStore, DEFAULT_MAX_BATCH_SIZE, DEFAULT_RETENTION};

use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use async_trait::async_trait;

/// Name of the secondary index keyed by owner host id
pub const BY_OWNER_INDEX: &str = "by-owner";

/// Field-name to value patch applied to a meta row
pub type AttributeUpdates = Map<String, Value>;

/// A flat row in the backing namespace.
///
/// Rows are keyed by (`id`, `path`); the `by-owner` index is keyed by
/// (`owner`, `path`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub path: String,
    pub owner: String,
    pub kind: String,
    /// Retention expiry, unix seconds
    pub expire_at: i64,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Item {
    pub fn key(&self) -> PrimaryKey {
        PrimaryKey::new(&self.id, &self.path)
    }
}

/// Primary key of a row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey {
    pub id: String,
    pub path: String,
}

impl PrimaryKey {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Predicate for full-namespace scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    All,
    PathEquals(String),
}

impl ScanFilter {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            ScanFilter::All => true,
            ScanFilter::PathEquals(path) => item.path == *path,
        }
    }
}

/// Backing key-value service.
///
/// Implementations own durability, consistency and expiry purge. The store
/// never retries a failed call.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Write a single row, replacing any row with the same primary key
    async fn put(&self, item: Item) -> Result<(), BackendError>;

    /// Write rows in one batch and report how many were persisted
    async fn batch_write(&self, items: Vec<Item>) -> Result<usize, BackendError>;

    /// Return every row matching the filter
    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Item>, BackendError>;

    /// Return every row in `index` whose owner is `owner`, ordered by path
    async fn query(&self, index: &str, owner: &str) -> Result<Vec<Item>, BackendError>;

    /// Set attributes on an existing row in place
    async fn update_attributes(
        &self,
        id: &str,
        path: &str,
        updates: &AttributeUpdates,
    ) -> Result<(), BackendError>;

    /// Largest batch accepted by `batch_write`
    fn max_batch_size(&self) -> usize;
}
