//! Temporal query engine
//!
//! The [`Replayer`] answers "what did the fleet look like at T" for one
//! instant, for every instant something changed, or on a fixed interval. The
//! enumerating queries read the fleet once and resolve every instant against
//! that single read. It is also the ingestion entry point that turns
//! observations into store upserts.

mod view;


pub use view::{
    event_times, interval_instants, resolve_fleet, FleetView, HostObservation, HostView,
    WorkloadObservation, WorkloadView,
};

use crate::error::{ReplayError, Result};
use crate::model::{HostRecord, WorkloadRecord};
use crate::observability::StructuredLogger;
use crate::store::{RequestContext, TreeStore};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Default cap on views per enumerating query
pub const DEFAULT_MAX_VIEWS_PER_QUERY: usize = 10_000;

/// Configuration for the query engine
#[derive(Debug, Clone)]
pub struct ReplayerConfig {
    /// Upper bound on views returned by eventful and interval queries
    pub max_views_per_query: usize,
}

impl Default for ReplayerConfig {
    fn default() -> Self {
        Self {
            max_views_per_query: DEFAULT_MAX_VIEWS_PER_QUERY,
        }
    }
}

/// Records observations and reconstructs point-in-time fleet views
#[derive(Clone)]
pub struct Replayer {
    store: TreeStore,
    config: ReplayerConfig,
    logger: StructuredLogger,
}

impl Replayer {
    pub fn new(store: TreeStore, config: ReplayerConfig, logger: StructuredLogger) -> Self {
        Self {
            store,
            config,
            logger,
        }
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn config(&self) -> &ReplayerConfig {
        &self.config
    }

    /// Fleet view at `at`
    pub async fn effective_at(&self, ctx: &RequestContext, at: DateTime<Utc>) -> Result<FleetView> {
        let hosts = self.store.get_all(ctx).await?;
        let view = resolve_fleet(&hosts, at);
        self.record_view(&view);

        self.logger.log_fleet_view(
            &at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            view.hosts.len(),
            view.workload_count(),
            view.omitted_hosts,
            view.omitted_workloads,
        );
        Ok(view)
    }

    /// One view per distinct snapshot time within `[begin, end]`
    pub async fn eventful_snapshots(
        &self,
        ctx: &RequestContext,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FleetView>> {
        if begin > end {
            return Ok(Vec::new());
        }

        let hosts = self.store.get_all(ctx).await?;
        let times = event_times(&hosts, begin, end);
        if times.len() > self.config.max_views_per_query {
            return Err(view::too_many_views(
                times.len(),
                self.config.max_views_per_query,
            ));
        }

        self.resolve_all(ctx, "eventful_snapshots", &hosts, times)
    }

    /// One view every `interval_secs` seconds from `begin` through `end`
    pub async fn interval_snapshots(
        &self,
        ctx: &RequestContext,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: i64,
    ) -> Result<Vec<FleetView>> {
        // Validated before the read so bad input costs no backend calls
        let instants =
            interval_instants(begin, end, interval_secs, self.config.max_views_per_query)?;
        if instants.is_empty() {
            return Ok(Vec::new());
        }

        let hosts = self.store.get_all(ctx).await?;
        self.resolve_all(ctx, "interval_snapshots", &hosts, instants)
    }

    /// Host tree as stored
    pub async fn host(&self, ctx: &RequestContext, host_id: &str) -> Result<HostRecord> {
        self.store.get(ctx, host_id).await
    }

    /// Record one host observation along with any workloads it carries.
    ///
    /// Workloads reporting a different host are written under that host, as
    /// [`record_workload_snapshots`](Self::record_workload_snapshots) would.
    pub async fn record_host_snapshot(
        &self,
        ctx: &RequestContext,
        observation: HostObservation,
    ) -> Result<()> {
        let HostObservation {
            host_id,
            attributes,
            snapshot,
            workloads,
        } = observation;

        let (own, elsewhere): (Vec<_>, Vec<_>) =
            workloads.into_iter().partition(|w| w.host_id == host_id);
        check_owning_hosts(&elsewhere)?;

        let timestamp = snapshot.timestamp;
        let mut host = HostRecord::new(host_id);
        host.attributes = attributes;
        host.history.insert(snapshot);
        host.workloads = merge_workloads(own).into_values().collect();

        self.store.upsert(ctx, &host).await?;
        self.logger.log_host_snapshot(
            &host.host_id,
            &timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            host.workloads.len(),
        );

        if !elsewhere.is_empty() {
            debug!(
                host_id = %host.host_id,
                workloads = elsewhere.len(),
                "Routing workloads observed under another host"
            );
            self.record_workload_snapshots(ctx, elsewhere).await?;
        }
        Ok(())
    }

    /// Record workload observations, one store write per owning host
    pub async fn record_workload_snapshots(
        &self,
        ctx: &RequestContext,
        observations: Vec<WorkloadObservation>,
    ) -> Result<()> {
        check_owning_hosts(&observations)?;

        let mut by_host: BTreeMap<String, Vec<WorkloadObservation>> = BTreeMap::new();
        for observation in observations {
            by_host
                .entry(observation.host_id.clone())
                .or_default()
                .push(observation);
        }

        let hosts = by_host.len();
        let mut workloads = 0;
        for (host_id, group) in by_host {
            let records: Vec<WorkloadRecord> = merge_workloads(group).into_values().collect();
            workloads += records.len();
            self.store.upsert_workloads(ctx, &host_id, &records).await?;
        }

        self.logger.log_workload_snapshots(hosts, workloads);
        Ok(())
    }

    fn resolve_all(
        &self,
        ctx: &RequestContext,
        operation: &'static str,
        hosts: &[HostRecord],
        instants: Vec<DateTime<Utc>>,
    ) -> Result<Vec<FleetView>> {
        let mut views = Vec::with_capacity(instants.len());
        for at in instants {
            ctx.check(operation)?;
            let view = resolve_fleet(hosts, at);
            self.record_view(&view);
            views.push(view);
        }

        debug!(
            operation,
            hosts = hosts.len(),
            views = views.len(),
            "Resolved fleet views"
        );
        Ok(views)
    }

    fn record_view(&self, view: &FleetView) {
        let metrics = self.store.metrics();
        metrics.inc_fleet_views_built();
        metrics.add_omitted("host", view.omitted_hosts as u64);
        metrics.add_omitted("workload", view.omitted_workloads as u64);
    }
}

fn check_owning_hosts(observations: &[WorkloadObservation]) -> Result<()> {
    match observations.iter().find(|o| o.host_id.is_empty()) {
        Some(bad) => Err(ReplayError::validation(format!(
            "workload {} has no owning host",
            bad.workload_id
        ))),
        None => Ok(()),
    }
}

/// Fold observations into one record per workload id.
///
/// Later observations of the same workload replace its attributes and add
/// to its history.
fn merge_workloads(
    observations: Vec<WorkloadObservation>,
) -> BTreeMap<String, WorkloadRecord> {
    let mut records: BTreeMap<String, WorkloadRecord> = BTreeMap::new();
    for observation in observations {
        let record = records
            .entry(observation.workload_id.clone())
            .or_insert_with(|| WorkloadRecord::new(observation.workload_id.clone()));
        record.attributes = observation.attributes;
        record.history.insert(observation.snapshot);
    }
    records
}
