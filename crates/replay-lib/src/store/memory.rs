//! In-memory key-value backend
//!
//! Rows live in a [`DashMap`] keyed by (id, path) with a second map acting as
//! the `by-owner` index. Optionally the rows are persisted to a JSON file,
//! written atomically through a temp file, and reloaded on startup. Expired
//! rows are dropped by [`MemoryBackend::purge_expired`], which the
//! maintenance task calls on an interval.

use super::{AttributeUpdates, Item, KvBackend, PrimaryKey, ScanFilter, BY_OWNER_INDEX};
use crate::error::BackendError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default maximum rows per batch write
const DEFAULT_MAX_BATCH_SIZE: usize = 25;

/// Configuration for the in-memory backend
#[derive(Debug, Clone)]
pub struct MemoryBackendConfig {
    /// Largest batch accepted by `batch_write`
    pub max_batch_size: usize,
    /// Path for persistent storage (optional)
    pub persistence_path: Option<PathBuf>,
    /// Minimum time between flushes to disk
    pub flush_interval: Duration,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            persistence_path: None,
            flush_interval: Duration::from_secs(60),
        }
    }
}

/// Owner index entry, ordered by path then id
type OwnerKey = (String, String);

/// Key-value backend held in process memory
pub struct MemoryBackend {
    rows: DashMap<PrimaryKey, Item>,
    by_owner: DashMap<String, BTreeSet<OwnerKey>>,
    config: MemoryBackendConfig,
    /// Set whenever rows change after the last flush
    dirty: AtomicBool,
    last_flush: Mutex<Instant>,
    /// Simulated outage; every call fails with `Unavailable`
    offline: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryBackendConfig::default())
    }
}

impl MemoryBackend {
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            rows: DashMap::new(),
            by_owner: DashMap::new(),
            config,
            dirty: AtomicBool::new(false),
            last_flush: Mutex::new(Instant::now()),
            offline: AtomicBool::new(false),
        }
    }

    /// Create a backend persisted at `config.persistence_path`, loading any
    /// rows already on disk
    pub fn with_persistence(config: MemoryBackendConfig) -> Result<Self> {
        let backend = Self::new(config);

        if let Some(path) = backend.config.persistence_path.as_deref() {
            if path.exists() {
                backend.load_from_disk(path)?;
            }
        }

        Ok(backend)
    }

    pub fn config(&self) -> &MemoryBackendConfig {
        &self.config
    }

    /// Number of rows held
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of distinct owners in the index
    pub fn owner_count(&self) -> usize {
        self.by_owner.len()
    }

    /// Start failing every call with `Unavailable`
    pub fn go_offline(&self) {
        if !self.offline.swap(true, Ordering::SeqCst) {
            warn!("Memory backend marked offline");
        }
    }

    pub fn go_online(&self) {
        if self.offline.swap(false, Ordering::SeqCst) {
            info!(rows = self.rows.len(), "Memory backend back online");
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Drop every row whose expiry is at or before `now_unix`
    pub fn purge_expired(&self, now_unix: i64) -> usize {
        let expired: Vec<Item> = self
            .rows
            .iter()
            .filter(|entry| entry.value().expire_at <= now_unix)
            .map(|entry| entry.value().clone())
            .collect();

        let mut purged = 0;
        for item in expired {
            // Re-check under the shard lock; the row may have been rewritten
            let removed = self
                .rows
                .remove_if(&item.key(), |_, row| row.expire_at <= now_unix);
            if let Some((_, row)) = removed {
                self.unindex(&row);
                purged += 1;
            }
        }

        if purged > 0 {
            self.dirty.store(true, Ordering::SeqCst);
            debug!(purged, remaining = self.rows.len(), "Purged expired rows");
        }
        purged
    }

    /// Flush rows to disk if persistence is enabled and anything changed
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(path) = self.config.persistence_path.as_deref() {
            // Clear first so writes racing the snapshot mark it dirty again
            self.dirty.store(false, Ordering::SeqCst);
            if let Err(e) = self.save_to_disk(path) {
                self.dirty.store(true, Ordering::SeqCst);
                return Err(e);
            }
            *self.last_flush.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
            debug!(path = %path.display(), rows = self.rows.len(), "Rows flushed to disk");
        }

        Ok(())
    }

    /// Check if a flush is due based on the flush interval
    pub fn should_flush(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
            && self.config.persistence_path.is_some()
            && self
                .last_flush
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .elapsed()
                >= self.config.flush_interval
    }

    fn ensure_online(&self) -> std::result::Result<(), BackendError> {
        if self.is_offline() {
            Err(BackendError::Unavailable("memory backend is offline".into()))
        } else {
            Ok(())
        }
    }

    fn insert(&self, item: Item) {
        let owner = item.owner.clone();
        let index_key = (item.path.clone(), item.id.clone());

        // The row guard is released before the index is touched
        let previous = self.rows.insert(item.key(), item);
        if let Some(previous) = previous.filter(|p| p.owner != owner) {
            self.unindex(&previous);
        }

        self.by_owner.entry(owner).or_default().insert(index_key);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Drop a row's owner-index entry unless the row has been written again.
    ///
    /// The check runs under the index entry guard, so a concurrent `insert`
    /// either sees its entry removed and re-adds it, or its row is seen here.
    /// Lock order is always index then rows.
    fn unindex(&self, item: &Item) {
        let emptied = match self.by_owner.get_mut(&item.owner) {
            Some(mut keys) => {
                let rewritten = self
                    .rows
                    .get(&item.key())
                    .is_some_and(|row| row.owner == item.owner);
                if !rewritten {
                    keys.remove(&(item.path.clone(), item.id.clone()));
                }
                keys.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_owner.remove_if(&item.owner, |_, keys| keys.is_empty());
        }
    }

    fn save_to_disk(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let mut items: Vec<Item> = self.rows.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        let json = serde_json::to_vec(&items).context("Failed to serialize rows")?;

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

        file.write_all(&json).context("Failed to write row data")?;
        file.sync_all().context("Failed to sync row file")?;

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

        Ok(())
    }

    fn load_from_disk(&self, path: &Path) -> Result<()> {
        let mut file =
            File::open(path).with_context(|| format!("Failed to open row file {:?}", path))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .context("Failed to read row file")?;

        let items: Vec<Item> =
            serde_json::from_slice(&data).context("Failed to deserialize row data")?;

        let loaded = items.len();
        for item in items {
            self.insert(item);
        }
        self.dirty.store(false, Ordering::SeqCst);

        info!(path = %path.display(), rows = loaded, "Loaded rows from disk");
        Ok(())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn put(&self, item: Item) -> std::result::Result<(), BackendError> {
        self.ensure_online()?;
        self.insert(item);
        Ok(())
    }

    async fn batch_write(&self, items: Vec<Item>) -> std::result::Result<usize, BackendError> {
        self.ensure_online()?;
        if items.len() > self.config.max_batch_size {
            return Err(BackendError::BatchTooLarge {
                size: items.len(),
                max: self.config.max_batch_size,
            });
        }

        let written = items.len();
        for item in items {
            self.insert(item);
        }
        Ok(written)
    }

    async fn scan(&self, filter: &ScanFilter) -> std::result::Result<Vec<Item>, BackendError> {
        self.ensure_online()?;
        let mut items: Vec<Item> = self
            .rows
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(items)
    }

    async fn query(&self, index: &str, owner: &str) -> std::result::Result<Vec<Item>, BackendError> {
        self.ensure_online()?;
        if index != BY_OWNER_INDEX {
            return Err(BackendError::UnknownIndex(index.to_string()));
        }

        // Copy the keys out so no index guard is held while reading rows
        let keys: Vec<OwnerKey> = match self.by_owner.get(owner) {
            Some(keys) => keys.iter().cloned().collect(),
            None => return Ok(Vec::new()),
        };

        Ok(keys
            .into_iter()
            .filter_map(|(path, id)| {
                self.rows
                    .get(&PrimaryKey::new(id, path))
                    .map(|row| row.value().clone())
            })
            .filter(|row| row.owner == owner)
            .collect())
    }

    async fn update_attributes(
        &self,
        id: &str,
        path: &str,
        updates: &AttributeUpdates,
    ) -> std::result::Result<(), BackendError> {
        self.ensure_online()?;
        let key = PrimaryKey::new(id, path);
        match self.rows.get_mut(&key) {
            Some(mut row) => {
                for (field, value) in updates {
                    row.attributes.insert(field.clone(), value.clone());
                }
            }
            None => {
                return Err(BackendError::ItemNotFound {
                    id: id.to_string(),
                    path: path.to_string(),
                })
            }
        }
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn item(id: &str, path: &str, owner: &str, expire_at: i64) -> Item {
        Item {
            id: id.into(),
            path: path.into(),
            owner: owner.into(),
            kind: "host_snapshot".into(),
            expire_at,
            attributes: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_put_replaces_same_key() {
        let backend = MemoryBackend::default();
        backend.put(item("a", "h1", "h1", 10)).await.unwrap();
        backend.put(item("a", "h1", "h1", 20)).await.unwrap();

        assert_eq!(backend.len(), 1);
        let rows = backend.query(BY_OWNER_INDEX, "h1").await.unwrap();
        assert_eq!(rows[0].expire_at, 20);
    }

    #[tokio::test]
    async fn test_query_orders_by_path() {
        let backend = MemoryBackend::default();
        backend.put(item("w1_t", "h1#w1", "h1", 0)).await.unwrap();
        backend.put(item("h1", "root", "h1", 0)).await.unwrap();
        backend.put(item("h1_t", "h1", "h1", 0)).await.unwrap();
        backend.put(item("h2", "root", "h2", 0)).await.unwrap();

        let paths: Vec<String> = backend
            .query(BY_OWNER_INDEX, "h1")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths, vec!["h1", "h1#w1", "root"]);
        assert!(backend.query(BY_OWNER_INDEX, "h3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_index_rejected() {
        let backend = MemoryBackend::default();
        let err = backend.query("by-kind", "h1").await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownIndex(_)));
    }

    #[tokio::test]
    async fn test_batch_too_large() {
        let backend = MemoryBackend::new(MemoryBackendConfig {
            max_batch_size: 2,
            ..Default::default()
        });
        let batch = (0..3)
            .map(|i| item(&format!("r{i}"), "h1", "h1", 0))
            .collect();

        let err = backend.batch_write(batch).await.unwrap_err();
        assert!(matches!(err, BackendError::BatchTooLarge { size: 3, max: 2 }));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let backend = MemoryBackend::default();
        let mut updates = AttributeUpdates::new();
        updates.insert("name".into(), json!("n"));

        let err = backend
            .update_attributes("h1", "root", &updates)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::ItemNotFound { .. }));
    }

    #[tokio::test]
    async fn test_purge_expired_updates_index() {
        let backend = MemoryBackend::default();
        backend.put(item("old", "h1", "h1", 100)).await.unwrap();
        backend.put(item("new", "h1", "h1", 300)).await.unwrap();
        backend.put(item("gone", "h2", "h2", 50)).await.unwrap();

        assert_eq!(backend.purge_expired(200), 2);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.owner_count(), 1);
        assert_eq!(backend.query(BY_OWNER_INDEX, "h1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_racing_rewrite_keeps_index_entry() {
        let backend = MemoryBackend::default();
        backend.put(item("h1", "root", "h1", 100)).await.unwrap();

        // Purge has removed the row but not yet unindexed it when a writer
        // puts the same key again
        let (_, purged) = backend
            .rows
            .remove_if(&PrimaryKey::new("h1", "root"), |_, row| row.expire_at <= 200)
            .unwrap();
        backend.put(item("h1", "root", "h1", 300)).await.unwrap();
        backend.unindex(&purged);

        assert_eq!(backend.len(), 1);
        let rows = backend.query(BY_OWNER_INDEX, "h1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].expire_at, 300);
    }

    #[tokio::test]
    async fn test_owner_change_moves_index_entry() {
        let backend = MemoryBackend::default();
        backend.put(item("w1", "h1#w1", "h1", 0)).await.unwrap();
        backend.put(item("w1", "h1#w1", "h2", 0)).await.unwrap();

        assert!(backend.query(BY_OWNER_INDEX, "h1").await.unwrap().is_empty());
        assert_eq!(backend.query(BY_OWNER_INDEX, "h2").await.unwrap().len(), 1);
        assert_eq!(backend.owner_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_rejects_calls() {
        let backend = MemoryBackend::default();
        backend.go_offline();
        assert!(matches!(
            backend.scan(&ScanFilter::All).await,
            Err(BackendError::Unavailable(_))
        ));
        backend.go_online();
        assert!(backend.scan(&ScanFilter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let config = MemoryBackendConfig {
            persistence_path: Some(dir.path().join("rows.json")),
            flush_interval: Duration::ZERO,
            ..Default::default()
        };

        {
            let backend = MemoryBackend::with_persistence(config.clone()).unwrap();
            backend.put(item("h1", "root", "h1", 0)).await.unwrap();
            backend.put(item("h1_t", "h1", "h1", 0)).await.unwrap();
            assert!(backend.should_flush());
            backend.flush().unwrap();
            assert!(!backend.should_flush());
        }

        let reloaded = MemoryBackend::with_persistence(config).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.query(BY_OWNER_INDEX, "h1").await.unwrap().len(), 2);
        assert!(!dir.path().join("rows.tmp").exists());
    }
}
