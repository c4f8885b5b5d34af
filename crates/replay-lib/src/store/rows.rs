//! Flat row layout for host trees
//!
//! Every row in a host's tree is owned by the host id and distinguished by a
//! `kind` tag:
//!
//! | kind                | id                      | path                 |
//! |---------------------|-------------------------|----------------------|
//! | `host_meta`         | host id                 | `root`               |
//! | `host_snapshot`     | `<host id>_<time>`      | host id              |
//! | `workload_meta`     | workload id             | host id              |
//! | `workload_snapshot` | `<workload id>_<time>`  | `<host id>#<wl id>`  |
//!
//! Decoding is a total mapping from tag to decoder; an unknown tag, a path
//! that does not match its tag, or a payload that does not decode is a
//! corrupt row.

use super::{AttributeUpdates, Item};
use crate::error::StoreFault;
use crate::model::{HostAttributes, HostSnapshot, WorkloadAttributes, WorkloadSnapshot};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Path of a host's own meta row
pub const ROOT_PATH: &str = "root";

const WORKLOAD_PATH_SEPARATOR: char = '#';

/// Row discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    HostMeta,
    HostSnapshot,
    WorkloadMeta,
    WorkloadSnapshot,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::HostMeta => "host_meta",
            RowKind::HostSnapshot => "host_snapshot",
            RowKind::WorkloadMeta => "workload_meta",
            RowKind::WorkloadSnapshot => "workload_snapshot",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "host_meta" => Some(RowKind::HostMeta),
            "host_snapshot" => Some(RowKind::HostSnapshot),
            "workload_meta" => Some(RowKind::WorkloadMeta),
            "workload_snapshot" => Some(RowKind::WorkloadSnapshot),
            _ => None,
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded row
#[derive(Debug, Clone, PartialEq)]
pub enum RowPayload {
    HostMeta {
        host_id: String,
        attributes: HostAttributes,
    },
    HostSnapshot {
        host_id: String,
        snapshot: HostSnapshot,
    },
    WorkloadMeta {
        host_id: String,
        workload_id: String,
        attributes: WorkloadAttributes,
    },
    WorkloadSnapshot {
        host_id: String,
        workload_id: String,
        snapshot: WorkloadSnapshot,
    },
}

impl RowPayload {
    pub fn kind(&self) -> RowKind {
        match self {
            RowPayload::HostMeta { .. } => RowKind::HostMeta,
            RowPayload::HostSnapshot { .. } => RowKind::HostSnapshot,
            RowPayload::WorkloadMeta { .. } => RowKind::WorkloadMeta,
            RowPayload::WorkloadSnapshot { .. } => RowKind::WorkloadSnapshot,
        }
    }

    /// Decode a flat row into its typed payload
    pub fn decode(item: &Item) -> Result<Self, StoreFault> {
        let kind = RowKind::parse(&item.kind)
            .ok_or_else(|| corrupt(item, format!("unknown kind '{}'", item.kind)))?;

        match kind {
            RowKind::HostMeta => {
                expect_path(item, ROOT_PATH)?;
                if item.id != item.owner {
                    return Err(corrupt(
                        item,
                        format!("host_meta row owned by '{}'", item.owner),
                    ));
                }
                Ok(RowPayload::HostMeta {
                    host_id: item.id.clone(),
                    attributes: decode_body(item)?,
                })
            }
            RowKind::HostSnapshot => {
                expect_path(item, &item.owner)?;
                Ok(RowPayload::HostSnapshot {
                    host_id: item.owner.clone(),
                    snapshot: decode_body(item)?,
                })
            }
            RowKind::WorkloadMeta => {
                expect_path(item, &item.owner)?;
                Ok(RowPayload::WorkloadMeta {
                    host_id: item.owner.clone(),
                    workload_id: item.id.clone(),
                    attributes: decode_body(item)?,
                })
            }
            RowKind::WorkloadSnapshot => {
                let workload_id = split_workload_path(&item.path)
                    .filter(|(host, _)| *host == item.owner)
                    .map(|(_, workload)| workload.to_string())
                    .ok_or_else(|| corrupt(item, format!("malformed path '{}'", item.path)))?;
                Ok(RowPayload::WorkloadSnapshot {
                    host_id: item.owner.clone(),
                    workload_id,
                    snapshot: decode_body(item)?,
                })
            }
        }
    }
}

/// Identity of a snapshot row: owner id plus timestamp
pub(crate) fn snapshot_id(owner_id: &str, timestamp: &DateTime<Utc>) -> String {
    format!(
        "{}_{}",
        owner_id,
        timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    )
}

pub(crate) fn workload_path(host_id: &str, workload_id: &str) -> String {
    format!("{host_id}{WORKLOAD_PATH_SEPARATOR}{workload_id}")
}

fn split_workload_path(path: &str) -> Option<(&str, &str)> {
    path.split_once(WORKLOAD_PATH_SEPARATOR)
        .filter(|(host, workload)| !host.is_empty() && !workload.is_empty())
}

pub(crate) fn host_meta_item(
    host_id: &str,
    attributes: &HostAttributes,
    expire_at: i64,
) -> Result<Item, StoreFault> {
    Ok(Item {
        id: host_id.to_string(),
        path: ROOT_PATH.to_string(),
        owner: host_id.to_string(),
        kind: RowKind::HostMeta.as_str().to_string(),
        expire_at,
        attributes: encode_body(attributes)?,
    })
}

pub(crate) fn host_snapshot_item(
    host_id: &str,
    snapshot: &HostSnapshot,
    expire_at: i64,
) -> Result<Item, StoreFault> {
    Ok(Item {
        id: snapshot_id(host_id, &snapshot.timestamp),
        path: host_id.to_string(),
        owner: host_id.to_string(),
        kind: RowKind::HostSnapshot.as_str().to_string(),
        expire_at,
        attributes: encode_body(snapshot)?,
    })
}

pub(crate) fn workload_meta_item(
    host_id: &str,
    workload_id: &str,
    attributes: &WorkloadAttributes,
    expire_at: i64,
) -> Result<Item, StoreFault> {
    Ok(Item {
        id: workload_id.to_string(),
        path: host_id.to_string(),
        owner: host_id.to_string(),
        kind: RowKind::WorkloadMeta.as_str().to_string(),
        expire_at,
        attributes: encode_body(attributes)?,
    })
}

pub(crate) fn workload_snapshot_item(
    host_id: &str,
    workload_id: &str,
    snapshot: &WorkloadSnapshot,
    expire_at: i64,
) -> Result<Item, StoreFault> {
    Ok(Item {
        id: snapshot_id(workload_id, &snapshot.timestamp),
        path: workload_path(host_id, workload_id),
        owner: host_id.to_string(),
        kind: RowKind::WorkloadSnapshot.as_str().to_string(),
        expire_at,
        attributes: encode_body(snapshot)?,
    })
}

/// Check that a patch only names fields of `T` and leaves it decodable
pub(crate) fn check_attribute_updates<T>(updates: &AttributeUpdates) -> Result<(), String>
where
    T: Serialize + DeserializeOwned + Default,
{
    let mut merged = encode_body(&T::default()).map_err(|e| e.to_string())?;

    for (field, value) in updates {
        if !merged.contains_key(field) {
            return Err(format!("'{field}' is not an updatable attribute"));
        }
        merged.insert(field.clone(), value.clone());
    }

    serde_json::from_value::<T>(Value::Object(merged))
        .map(|_| ())
        .map_err(|e| format!("attribute update does not decode: {e}"))
}

fn encode_body<T: Serialize>(value: &T) -> Result<Map<String, Value>, StoreFault> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreFault::Encode(serde::ser::Error::custom(format!(
            "expected an object body, got {other}"
        )))),
    }
}

fn decode_body<T: DeserializeOwned>(item: &Item) -> Result<T, StoreFault> {
    serde_json::from_value(Value::Object(item.attributes.clone()))
        .map_err(|e| corrupt(item, format!("{} payload does not decode: {e}", item.kind)))
}

fn expect_path(item: &Item, expected: &str) -> Result<(), StoreFault> {
    if item.path == expected {
        Ok(())
    } else {
        Err(corrupt(
            item,
            format!("{} row has path '{}', expected '{expected}'", item.kind, item.path),
        ))
    }
}

fn corrupt(item: &Item, reason: String) -> StoreFault {
    StoreFault::CorruptRow {
        id: item.id.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostCondition, WorkloadPhase};
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_row_layout() {
        let host = host_meta_item("h1", &HostAttributes::default(), 99).unwrap();
        assert_eq!((host.id.as_str(), host.path.as_str()), ("h1", "root"));
        assert_eq!(host.owner, "h1");
        assert_eq!(host.expire_at, 99);

        let snap = HostSnapshot::new(ts(10), HostCondition::Ready);
        let row = host_snapshot_item("h1", &snap, 99).unwrap();
        assert_eq!(row.id, "h1_1970-01-01T00:00:10Z");
        assert_eq!(row.path, "h1");

        let meta = workload_meta_item("h1", "w1", &WorkloadAttributes::default(), 99).unwrap();
        assert_eq!((meta.id.as_str(), meta.path.as_str()), ("w1", "h1"));

        let wsnap = WorkloadSnapshot::new(ts(12), WorkloadPhase::Running);
        let row = workload_snapshot_item("h1", "w1", &wsnap, 99).unwrap();
        assert_eq!(row.id, "w1_1970-01-01T00:00:12Z");
        assert_eq!(row.path, "h1#w1");
        assert_eq!(row.owner, "h1");
        assert_eq!(row.kind, "workload_snapshot");
    }

    #[test]
    fn test_decode_every_kind() {
        let wsnap = WorkloadSnapshot::new(ts(12), WorkloadPhase::Running);
        let row = workload_snapshot_item("h1", "w_1", &wsnap, 0).unwrap();

        match RowPayload::decode(&row).unwrap() {
            RowPayload::WorkloadSnapshot {
                host_id,
                workload_id,
                snapshot,
            } => {
                assert_eq!(host_id, "h1");
                assert_eq!(workload_id, "w_1");
                assert_eq!(snapshot, wsnap);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let meta = host_meta_item("h1", &HostAttributes::default(), 0).unwrap();
        assert_eq!(RowPayload::decode(&meta).unwrap().kind(), RowKind::HostMeta);
    }

    #[test]
    fn test_unknown_kind_is_corrupt() {
        let mut row = host_meta_item("h1", &HostAttributes::default(), 0).unwrap();
        row.kind = "node_meta".into();

        let err = RowPayload::decode(&row).unwrap_err();
        assert!(err.to_string().contains("unknown kind 'node_meta'"));
    }

    #[test]
    fn test_mismatched_payload_is_corrupt() {
        let mut row = host_snapshot_item("h1", &HostSnapshot::new(ts(1), HostCondition::Ready), 0)
            .unwrap();
        row.attributes.insert("timestamp".into(), json!(12));

        assert!(matches!(
            RowPayload::decode(&row),
            Err(StoreFault::CorruptRow { .. })
        ));
    }

    #[test]
    fn test_mismatched_path_is_corrupt() {
        let mut row = workload_snapshot_item(
            "h1",
            "w1",
            &WorkloadSnapshot::new(ts(1), WorkloadPhase::Pending),
            0,
        )
        .unwrap();
        row.path = "h2#w1".into();
        assert!(RowPayload::decode(&row).is_err());

        row.path = "h1".into();
        assert!(RowPayload::decode(&row).is_err());
    }

    #[test]
    fn test_attribute_update_checks() {
        let mut updates = AttributeUpdates::new();
        updates.insert("kernel_version".into(), json!("6.1.0"));
        assert!(check_attribute_updates::<HostAttributes>(&updates).is_ok());

        updates.insert("roles".into(), json!("not-a-list"));
        assert!(check_attribute_updates::<HostAttributes>(&updates).is_err());

        let mut unknown = AttributeUpdates::new();
        unknown.insert("timestamp".into(), json!("2024-01-01T00:00:00Z"));
        let err = check_attribute_updates::<WorkloadAttributes>(&unknown).unwrap_err();
        assert!(err.contains("'timestamp'"));
    }
}
