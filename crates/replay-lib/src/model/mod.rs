//! Entity model for hosts, workloads and their snapshot histories
//!
//! A [`HostRecord`] is the root of a tree: it owns its own history of
//! [`HostSnapshot`]s and the [`WorkloadRecord`]s scheduled on it, each of
//! which owns an independent history of [`WorkloadSnapshot`]s. Everything in
//! this module is a plain value type; no I/O happens here.

mod enums;
mod history;
mod workloads;

pub use enums::{HostCondition, QosClass, WorkloadPhase};
pub use history::{effective_snapshot, is_unset, History, Timestamped, UNSET_TIMESTAMP};
pub use workloads::WorkloadSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable, unversioned descriptive attributes of a host.
///
/// Always reflects the latest known value; patched in place rather than
/// snapshotted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostAttributes {
    pub name: String,
    pub provider_id: String,
    pub architecture: String,
    pub container_runtime_version: String,
    pub kernel_version: String,
    pub kubelet_version: String,
    pub kube_proxy_version: String,
    pub os_image: String,
    pub operating_system: String,
    pub machine_id: String,
    pub system_uuid: String,
    pub boot_id: String,
    pub roles: Vec<String>,
}

/// Root of a host tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_id: String,
    #[serde(default)]
    pub attributes: HostAttributes,
    #[serde(default)]
    pub history: History<HostSnapshot>,
    #[serde(default)]
    pub workloads: WorkloadSet,
}

impl HostRecord {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            ..Default::default()
        }
    }

    /// Find a workload by id
    pub fn workload(&self, workload_id: &str) -> Option<&WorkloadRecord> {
        self.workloads.get(workload_id)
    }

    /// Total number of snapshots in the tree
    pub fn snapshot_count(&self) -> usize {
        self.history.len() + self.workloads.iter().map(|w| w.history.len()).sum::<usize>()
    }
}

/// Resource quantities of a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostCapacity {
    pub cpu: String,
    pub memory: String,
    pub ephemeral_storage: String,
    pub pods: i64,
}

/// Scheduling taint on a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: String,
    pub time_added: Option<DateTime<Utc>>,
}

/// Immutable observation of a host's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub condition: HostCondition,
    #[serde(default)]
    pub capacity: HostCapacity,
    #[serde(default)]
    pub allocatable: HostCapacity,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
}

impl HostSnapshot {
    pub fn new(timestamp: DateTime<Utc>, condition: HostCondition) -> Self {
        Self {
            timestamp,
            condition,
            capacity: HostCapacity::default(),
            allocatable: HostCapacity::default(),
            taints: Vec::new(),
            unschedulable: false,
        }
    }
}

impl Timestamped for HostSnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Mutable, unversioned attributes of a workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadAttributes {
    pub name: String,
    pub namespace: String,
    pub started_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deleted_by: String,
    pub qos_class: QosClass,
}

/// A workload and its snapshot history.
///
/// Host affiliation is fixed at creation: the record lives under exactly one
/// [`HostRecord`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub workload_id: String,
    #[serde(default)]
    pub attributes: WorkloadAttributes,
    #[serde(default)]
    pub history: History<WorkloadSnapshot>,
}

impl WorkloadRecord {
    pub fn new(workload_id: impl Into<String>) -> Self {
        Self {
            workload_id: workload_id.into(),
            ..Default::default()
        }
    }
}

/// Immutable observation of a workload's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub phase: WorkloadPhase,
    #[serde(default)]
    pub init_components: Vec<ComponentSnapshot>,
    #[serde(default)]
    pub ephemeral_components: Vec<ComponentSnapshot>,
    #[serde(default)]
    pub components: Vec<ComponentSnapshot>,
}

impl WorkloadSnapshot {
    pub fn new(timestamp: DateTime<Utc>, phase: WorkloadPhase) -> Self {
        Self {
            timestamp,
            phase,
            init_components: Vec::new(),
            ephemeral_components: Vec::new(),
            components: Vec::new(),
        }
    }
}

impl Timestamped for WorkloadSnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Requests or limits for a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceQuantities {
    pub cpu: String,
    pub memory: String,
    pub ephemeral_storage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentResources {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

/// Current or last-terminated state of a component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentState {
    pub exit_code: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reason: String,
}

/// Sub-unit of a workload (e.g. a container); only stored nested in a
/// [`WorkloadSnapshot`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentSnapshot {
    pub runtime_id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub ready: bool,
    pub restart_count: i64,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub resources: ComponentResources,
    pub state: ComponentState,
    pub last_state: ComponentState,
}
