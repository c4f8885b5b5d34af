//! Point-in-time views and ingestion observations
//!
//! Resolution here is pure: it takes an already fetched fleet and a time and
//! never touches the store.

use crate::error::{ReplayError, Result};
use crate::model::{
    HostAttributes, HostRecord, HostSnapshot, Timestamped, WorkloadAttributes, WorkloadSnapshot,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// State of the whole fleet at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetView {
    pub timestamp: DateTime<Utc>,
    /// Hosts with an effective snapshot, ordered by host id
    pub hosts: Vec<HostView>,
    /// Hosts left out because every snapshot postdates `timestamp`
    #[serde(default)]
    pub omitted_hosts: usize,
    /// Workloads left out for the same reason, on hosts that were kept
    #[serde(default)]
    pub omitted_workloads: usize,
}

impl FleetView {
    pub fn host(&self, host_id: &str) -> Option<&HostView> {
        self.hosts.iter().find(|h| h.host_id == host_id)
    }

    pub fn workload_count(&self) -> usize {
        self.hosts.iter().map(|h| h.workloads.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostView {
    pub host_id: String,
    pub attributes: HostAttributes,
    pub snapshot: HostSnapshot,
    pub workloads: Vec<WorkloadView>,
}

impl HostView {
    pub fn workload(&self, workload_id: &str) -> Option<&WorkloadView> {
        self.workloads.iter().find(|w| w.workload_id == workload_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadView {
    pub workload_id: String,
    pub attributes: WorkloadAttributes,
    pub snapshot: WorkloadSnapshot,
}

/// One observation of a host, optionally with its workloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostObservation {
    pub host_id: String,
    #[serde(default)]
    pub attributes: HostAttributes,
    pub snapshot: HostSnapshot,
    #[serde(default)]
    pub workloads: Vec<WorkloadObservation>,
}

/// One observation of a workload on its owning host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadObservation {
    pub host_id: String,
    pub workload_id: String,
    #[serde(default)]
    pub attributes: WorkloadAttributes,
    pub snapshot: WorkloadSnapshot,
}

/// Build the fleet view at `at` from fetched host trees.
///
/// A host with no snapshot at or before `at` is omitted along with its
/// workloads; a workload with no such snapshot is omitted on its own.
pub fn resolve_fleet(hosts: &[HostRecord], at: DateTime<Utc>) -> FleetView {
    let mut view = FleetView {
        timestamp: at,
        hosts: Vec::with_capacity(hosts.len()),
        omitted_hosts: 0,
        omitted_workloads: 0,
    };

    for host in hosts {
        let Some(snapshot) = host.history.effective_at(at) else {
            view.omitted_hosts += 1;
            continue;
        };

        let mut workloads = Vec::with_capacity(host.workloads.len());
        for workload in &host.workloads {
            match workload.history.effective_at(at) {
                Some(snapshot) => workloads.push(WorkloadView {
                    workload_id: workload.workload_id.clone(),
                    attributes: workload.attributes.clone(),
                    snapshot: snapshot.clone(),
                }),
                None => view.omitted_workloads += 1,
            }
        }

        view.hosts.push(HostView {
            host_id: host.host_id.clone(),
            attributes: host.attributes.clone(),
            snapshot: snapshot.clone(),
            workloads,
        });
    }

    view
}

/// Distinct host and workload snapshot times within `[begin, end]`, ascending
pub fn event_times(
    hosts: &[HostRecord],
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    if begin > end {
        return Vec::new();
    }

    let mut times = BTreeSet::new();
    for host in hosts {
        times.extend(host.history.within(begin, end).iter().map(|s| s.timestamp()));
        for workload in &host.workloads {
            times.extend(
                workload
                    .history
                    .within(begin, end)
                    .iter()
                    .map(|s| s.timestamp()),
            );
        }
    }
    times.into_iter().collect()
}

/// Instants `begin, begin + k, ...` not after `end`.
///
/// Fails when `interval_secs` is not positive or the instant count would
/// exceed `max_instants`.
pub fn interval_instants(
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    interval_secs: i64,
    max_instants: usize,
) -> Result<Vec<DateTime<Utc>>> {
    if interval_secs <= 0 {
        return Err(ReplayError::validation(format!(
            "interval must be positive, got {interval_secs}s"
        )));
    }
    if begin > end {
        return Ok(Vec::new());
    }

    let steps = (end - begin).num_seconds() / interval_secs;
    let count = usize::try_from(steps)
        .ok()
        .and_then(|s| s.checked_add(1))
        .filter(|c| *c <= max_instants)
        .ok_or_else(|| too_many_views(steps.saturating_add(1), max_instants))?;

    Ok((0..count)
        .filter_map(|i| {
            let offset = i64::try_from(i).ok()?.checked_mul(interval_secs)?;
            begin.checked_add_signed(Duration::seconds(offset))
        })
        .collect())
}

pub(crate) fn too_many_views(requested: impl std::fmt::Display, max: usize) -> ReplayError {
    ReplayError::validation(format!(
        "query would produce {requested} views, more than the limit of {max}"
    ))
}
