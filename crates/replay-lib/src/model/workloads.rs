//! The workloads of one host, keyed by workload id
//!
//! Records are held in ascending id order with at most one record per id, so
//! two sets holding the same workloads compare equal however they were built.

use super::WorkloadRecord;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{slice, vec};

/// Workload records of a host, unique by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkloadSet {
    records: Vec<WorkloadRecord>,
}

impl WorkloadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record at its sorted position, returning the record it
    /// replaced when the id was already present
    pub fn insert(&mut self, record: WorkloadRecord) -> Option<WorkloadRecord> {
        match self.position(&record.workload_id) {
            Ok(idx) => Some(std::mem::replace(&mut self.records[idx], record)),
            Err(idx) => {
                self.records.insert(idx, record);
                None
            }
        }
    }

    pub fn get(&self, workload_id: &str) -> Option<&WorkloadRecord> {
        self.position(workload_id).ok().map(|idx| &self.records[idx])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ascending id order
    pub fn iter(&self) -> slice::Iter<'_, WorkloadRecord> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[WorkloadRecord] {
        &self.records
    }

    fn position(&self, workload_id: &str) -> Result<usize, usize> {
        self.records
            .binary_search_by(|r| r.workload_id.as_str().cmp(workload_id))
    }
}

/// Fails on the first repeated id
impl TryFrom<Vec<WorkloadRecord>> for WorkloadSet {
    type Error = String;

    fn try_from(records: Vec<WorkloadRecord>) -> Result<Self, Self::Error> {
        let mut set = Self::new();
        for record in records {
            let workload_id = record.workload_id.clone();
            if set.insert(record).is_some() {
                return Err(format!("duplicate workload id '{workload_id}'"));
            }
        }
        Ok(set)
    }
}

/// Later records replace earlier ones with the same id
impl FromIterator<WorkloadRecord> for WorkloadSet {
    fn from_iter<I: IntoIterator<Item = WorkloadRecord>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl IntoIterator for WorkloadSet {
    type Item = WorkloadRecord;
    type IntoIter = vec::IntoIter<WorkloadRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a WorkloadSet {
    type Item = &'a WorkloadRecord;
    type IntoIter = slice::Iter<'a, WorkloadRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl Serialize for WorkloadSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WorkloadSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<WorkloadRecord>::deserialize(deserializer)?;
        WorkloadSet::try_from(records).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(set: &WorkloadSet) -> Vec<&str> {
        set.iter().map(|w| w.workload_id.as_str()).collect()
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let build = |order: [&str; 3]| -> WorkloadSet {
            order.into_iter().map(WorkloadRecord::new).collect()
        };
        let forward = build(["w1", "w2", "w3"]);
        let backward = build(["w3", "w2", "w1"]);

        assert_eq!(forward, backward);
        assert_eq!(ids(&backward), vec!["w1", "w2", "w3"]);
        assert!(backward.get("w2").is_some());
        assert!(backward.get("w4").is_none());
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut set = WorkloadSet::new();
        assert!(set.insert(WorkloadRecord::new("w1")).is_none());

        let mut renamed = WorkloadRecord::new("w1");
        renamed.attributes.name = "api".into();
        let previous = set.insert(renamed).unwrap();

        assert_eq!(previous.attributes.name, "");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("w1").unwrap().attributes.name, "api");
    }

    #[test]
    fn test_json_rejects_duplicate_ids() {
        let json = serde_json::json!([{ "workload_id": "w1" }, { "workload_id": "w1" }]);
        let err = serde_json::from_value::<WorkloadSet>(json).unwrap_err();
        assert!(err.to_string().contains("duplicate workload id 'w1'"));

        let json = serde_json::json!([{ "workload_id": "w2" }, { "workload_id": "w1" }]);
        let set: WorkloadSet = serde_json::from_value(json).unwrap();
        assert_eq!(ids(&set), vec!["w1", "w2"]);
    }
}
