//! Host tree persistence over a [`KvBackend`]
//!
//! Writes stamp a retention expiry on every row and go out in batches no
//! larger than the backend accepts; each batch's acknowledged count must match
//! what was submitted. Reads query the owner index once per host and rebuild
//! the tree from the flat, kind-tagged rows.
//!
//! Multi-row writes are not atomic. Row identities are derived from owner id
//! and timestamp, so re-running a failed upsert converges on the same rows.

use super::rows::{self, RowPayload, ROOT_PATH};
use super::{AttributeUpdates, Item, KvBackend, RequestContext, ScanFilter, BY_OWNER_INDEX};
use crate::error::{BackendError, ReplayError, Result, StoreFault};
use crate::model::{
    HostAttributes, HostRecord, HostSnapshot, Timestamped, WorkloadAttributes, WorkloadRecord,
    WorkloadSet, WorkloadSnapshot,
};
use crate::observability::ReplayMetrics;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default row retention (90 days)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(90 * 24 * 60 * 60);

/// Default batch size limit, matching common managed key-value services
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;

/// Configuration for the tree store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Namespace (table) name, used to label whole-fleet operations
    pub table: String,
    /// How long rows live after being written
    pub retention: Duration,
    /// Upper bound on rows per batch write
    pub max_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: "fleet".to_string(),
            retention: DEFAULT_RETENTION,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Tree-shaped snapshot store over a flat key-value backend
#[derive(Clone)]
pub struct TreeStore {
    backend: Arc<dyn KvBackend>,
    config: StoreConfig,
    metrics: ReplayMetrics,
}

impl TreeStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: StoreConfig, metrics: ReplayMetrics) -> Self {
        Self {
            backend,
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ReplayMetrics {
        &self.metrics
    }

    /// Read every host tree in the namespace, ordered by host id
    pub async fn get_all(&self, ctx: &RequestContext) -> Result<Vec<HostRecord>> {
        self.observe("get_all", self.get_all_inner(ctx)).await
    }

    /// Read one host tree
    pub async fn get(&self, ctx: &RequestContext, host_id: &str) -> Result<HostRecord> {
        self.observe("get", self.get_inner(ctx, host_id)).await
    }

    /// Write a whole host tree: meta row, host history, workloads and their
    /// histories. The meta row is overwritten unconditionally.
    pub async fn upsert(&self, ctx: &RequestContext, host: &HostRecord) -> Result<()> {
        self.observe("upsert", self.upsert_inner(ctx, host)).await
    }

    /// Append snapshots to a host's history
    pub async fn upsert_host_snapshots(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        snapshots: &[HostSnapshot],
    ) -> Result<()> {
        self.observe("upsert_host_snapshots", async {
            validate_id("host", host_id)?;
            validate_timestamps(host_id, snapshots)?;
            self.write_host_snapshots(ctx, host_id, snapshots).await
        })
        .await
    }

    /// Write workload meta rows under a host, then each workload's history
    pub async fn upsert_workloads(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        workloads: &[WorkloadRecord],
    ) -> Result<()> {
        self.observe("upsert_workloads", async {
            validate_id("host", host_id)?;
            validate_workloads(workloads)?;
            self.write_workloads(ctx, host_id, workloads).await
        })
        .await
    }

    /// Append snapshots to a workload's history
    pub async fn upsert_workload_snapshots(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        workload_id: &str,
        snapshots: &[WorkloadSnapshot],
    ) -> Result<()> {
        self.observe("upsert_workload_snapshots", async {
            validate_id("host", host_id)?;
            validate_id("workload", workload_id)?;
            validate_timestamps(workload_id, snapshots)?;
            self.write_workload_snapshots(ctx, host_id, workload_id, snapshots)
                .await
        })
        .await
    }

    /// Patch mutable attributes on a host's meta row
    pub async fn update_host_attributes(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        updates: &AttributeUpdates,
    ) -> Result<()> {
        self.observe("update_host_attributes", async {
            validate_id("host", host_id)?;
            validate_updates::<HostAttributes>(updates)?;
            ctx.run(
                "update_host_attributes",
                host_id,
                self.backend.update_attributes(host_id, ROOT_PATH, updates),
            )
            .await
            .map_err(|e| missing_row_as_not_found(e, format!("host {host_id}")))
        })
        .await
    }

    /// Patch mutable attributes on a workload's meta row
    pub async fn update_workload_attributes(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        workload_id: &str,
        updates: &AttributeUpdates,
    ) -> Result<()> {
        self.observe("update_workload_attributes", async {
            validate_id("host", host_id)?;
            validate_id("workload", workload_id)?;
            validate_updates::<WorkloadAttributes>(updates)?;
            ctx.run(
                "update_workload_attributes",
                workload_id,
                self.backend.update_attributes(workload_id, host_id, updates),
            )
            .await
            .map_err(|e| missing_row_as_not_found(e, format!("workload {workload_id}")))
        })
        .await
    }

    async fn get_all_inner(&self, ctx: &RequestContext) -> Result<Vec<HostRecord>> {
        let roots = ctx
            .run(
                "get_all",
                &self.config.table,
                self.backend
                    .scan(&ScanFilter::PathEquals(ROOT_PATH.to_string())),
            )
            .await?;

        let mut host_ids: Vec<String> = roots
            .into_iter()
            .filter(|item| item.kind == rows::RowKind::HostMeta.as_str())
            .map(|item| item.id)
            .collect();
        host_ids.sort();
        host_ids.dedup();

        let mut hosts = Vec::with_capacity(host_ids.len());
        for host_id in host_ids {
            let host = self.get_inner(ctx, &host_id).await.map_err(|e| match e {
                ReplayError::NotFound(_) => ReplayError::store(
                    "get_all",
                    host_id.as_str(),
                    StoreFault::InconsistentRead(
                        "host meta row vanished between scan and query".to_string(),
                    ),
                ),
                other => other,
            })?;
            hosts.push(host);
        }

        self.metrics
            .set_hosts_tracked(i64::try_from(hosts.len()).unwrap_or(i64::MAX));
        debug!(hosts = hosts.len(), table = %self.config.table, "Read fleet");
        Ok(hosts)
    }

    async fn get_inner(&self, ctx: &RequestContext, host_id: &str) -> Result<HostRecord> {
        validate_id("host", host_id)?;
        let items = ctx
            .run("get", host_id, self.backend.query(BY_OWNER_INDEX, host_id))
            .await?;
        assemble_tree(host_id, &items)
    }

    async fn upsert_inner(&self, ctx: &RequestContext, host: &HostRecord) -> Result<()> {
        validate_host(host)?;

        let item = rows::host_meta_item(&host.host_id, &host.attributes, self.expire_at())
            .map_err(|f| ReplayError::store("upsert", host.host_id.as_str(), f))?;
        ctx.run("upsert", &host.host_id, self.backend.put(item))
            .await?;
        self.metrics.add_rows_written(1);

        self.write_host_snapshots(ctx, &host.host_id, host.history.as_slice())
            .await?;
        self.write_workloads(ctx, &host.host_id, host.workloads.as_slice())
            .await?;

        debug!(
            host_id = %host.host_id,
            snapshots = host.history.len(),
            workloads = host.workloads.len(),
            "Upserted host tree"
        );
        Ok(())
    }

    async fn write_host_snapshots(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        snapshots: &[HostSnapshot],
    ) -> Result<()> {
        let expire_at = self.expire_at();
        let items = snapshots
            .iter()
            .map(|s| rows::host_snapshot_item(host_id, s, expire_at))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|f| ReplayError::store("upsert_host_snapshots", host_id, f))?;

        self.write_batches(ctx, "upsert_host_snapshots", host_id, items)
            .await
    }

    async fn write_workloads(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        workloads: &[WorkloadRecord],
    ) -> Result<()> {
        let expire_at = self.expire_at();
        let items = workloads
            .iter()
            .map(|w| rows::workload_meta_item(host_id, &w.workload_id, &w.attributes, expire_at))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|f| ReplayError::store("upsert_workloads", host_id, f))?;

        // Meta rows first so readers never see snapshots without their workload
        self.write_batches(ctx, "upsert_workloads", host_id, items)
            .await?;

        for workload in workloads {
            self.write_workload_snapshots(
                ctx,
                host_id,
                &workload.workload_id,
                workload.history.as_slice(),
            )
            .await?;
        }
        Ok(())
    }

    async fn write_workload_snapshots(
        &self,
        ctx: &RequestContext,
        host_id: &str,
        workload_id: &str,
        snapshots: &[WorkloadSnapshot],
    ) -> Result<()> {
        let expire_at = self.expire_at();
        let items = snapshots
            .iter()
            .map(|s| rows::workload_snapshot_item(host_id, workload_id, s, expire_at))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|f| ReplayError::store("upsert_workload_snapshots", workload_id, f))?;

        self.write_batches(ctx, "upsert_workload_snapshots", workload_id, items)
            .await
    }

    /// Write rows in backend-sized chunks, verifying each chunk's count
    async fn write_batches(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        entity: &str,
        items: Vec<Item>,
    ) -> Result<()> {
        let limit = self.batch_limit();
        let total = items.len();
        let mut rows = items.into_iter();

        loop {
            let chunk: Vec<Item> = rows.by_ref().take(limit).collect();
            if chunk.is_empty() {
                break;
            }

            let submitted = chunk.len();
            let persisted = ctx
                .run(operation, entity, self.backend.batch_write(chunk))
                .await?;
            self.metrics
                .add_rows_written(u64::try_from(persisted).unwrap_or(u64::MAX));

            if persisted != submitted {
                self.metrics.inc_partial_writes();
                return Err(ReplayError::store(
                    operation,
                    entity,
                    StoreFault::PartialWrite {
                        persisted,
                        submitted,
                    },
                ));
            }
        }

        if total > 0 {
            debug!(operation, entity = %entity, rows = total, batch_limit = limit, "Batch written");
        }
        Ok(())
    }

    fn batch_limit(&self) -> usize {
        self.config
            .max_batch_size
            .min(self.backend.max_batch_size())
            .max(1)
    }

    fn expire_at(&self) -> i64 {
        let retention = i64::try_from(self.config.retention.as_secs()).unwrap_or(i64::MAX);
        Utc::now().timestamp().saturating_add(retention)
    }

    /// Record latency and failures for a store operation
    async fn observe<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics
            .observe_store_latency(operation, start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            self.metrics.inc_store_errors(operation, e.kind());
            debug!(operation, error = %e, "Store operation failed");
        }
        result
    }
}

/// Rebuild a host tree from the rows of its owner-index query
fn assemble_tree(host_id: &str, items: &[Item]) -> Result<HostRecord> {
    let mut attributes: Option<HostAttributes> = None;
    let mut host_snapshots = Vec::new();
    let mut workloads: BTreeMap<String, WorkloadAttributes> = BTreeMap::new();
    let mut workload_snapshots: HashMap<String, Vec<WorkloadSnapshot>> = HashMap::new();

    for item in items {
        if item.owner != host_id {
            return Err(ReplayError::store(
                "get",
                host_id,
                StoreFault::InconsistentRead(format!(
                    "row {} owned by '{}' returned for host query",
                    item.id, item.owner
                )),
            ));
        }

        match RowPayload::decode(item).map_err(|f| ReplayError::store("get", host_id, f))? {
            RowPayload::HostMeta { attributes: a, .. } => attributes = Some(a),
            RowPayload::HostSnapshot { snapshot, .. } => host_snapshots.push(snapshot),
            RowPayload::WorkloadMeta {
                workload_id,
                attributes: a,
                ..
            } => {
                workloads.insert(workload_id, a);
            }
            RowPayload::WorkloadSnapshot {
                workload_id,
                snapshot,
                ..
            } => workload_snapshots
                .entry(workload_id)
                .or_default()
                .push(snapshot),
        }
    }

    let attributes = attributes.ok_or_else(|| ReplayError::NotFound(format!("host {host_id}")))?;

    let workloads: WorkloadSet = workloads
        .into_iter()
        .map(|(workload_id, attributes)| {
            let history = workload_snapshots
                .remove(&workload_id)
                .map(Into::into)
                .unwrap_or_default();
            WorkloadRecord {
                workload_id,
                attributes,
                history,
            }
        })
        .collect();

    // Snapshots without a meta row come from a write still in flight
    for (workload_id, orphans) in &workload_snapshots {
        warn!(
            host_id = %host_id,
            workload_id = %workload_id,
            snapshots = orphans.len(),
            "Skipping workload snapshots without a workload meta row"
        );
    }

    Ok(HostRecord {
        host_id: host_id.to_string(),
        attributes,
        history: host_snapshots.into(),
        workloads,
    })
}

fn validate_id(entity: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ReplayError::validation(format!("{entity} id is empty")));
    }
    if id.contains('#') {
        return Err(ReplayError::validation(format!(
            "{entity} id '{id}' contains reserved character '#'"
        )));
    }
    if entity == "host" && id == ROOT_PATH {
        return Err(ReplayError::validation(format!(
            "host id '{ROOT_PATH}' is reserved"
        )));
    }
    Ok(())
}

fn validate_timestamps<S: Timestamped>(owner_id: &str, snapshots: &[S]) -> Result<()> {
    if snapshots.iter().any(|s| !s.has_timestamp()) {
        return Err(ReplayError::validation(format!(
            "snapshot of {owner_id} has an unset timestamp"
        )));
    }
    Ok(())
}

fn validate_workload(workload: &WorkloadRecord) -> Result<()> {
    validate_id("workload", &workload.workload_id)?;
    validate_timestamps(&workload.workload_id, workload.history.as_slice())
}

/// Reject repeated ids, which would otherwise merge on read
fn validate_workloads(workloads: &[WorkloadRecord]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for workload in workloads {
        validate_workload(workload)?;
        if !seen.insert(workload.workload_id.as_str()) {
            return Err(ReplayError::validation(format!(
                "workload id '{}' appears more than once",
                workload.workload_id
            )));
        }
    }
    Ok(())
}

/// Validate an entire tree before the first write
fn validate_host(host: &HostRecord) -> Result<()> {
    validate_id("host", &host.host_id)?;
    validate_timestamps(&host.host_id, host.history.as_slice())?;
    validate_workloads(host.workloads.as_slice())
}

fn validate_updates<T>(updates: &AttributeUpdates) -> Result<()>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Default,
{
    if updates.is_empty() {
        return Err(ReplayError::validation("no attributes to update"));
    }
    rows::check_attribute_updates::<T>(updates).map_err(ReplayError::Validation)
}

fn missing_row_as_not_found(err: ReplayError, entity: String) -> ReplayError {
    match err {
        ReplayError::Store {
            source: StoreFault::Backend(BackendError::ItemNotFound { .. }),
            ..
        } => ReplayError::NotFound(entity),
        other => other,
    }
}
