//! Append-only snapshot histories and effective-snapshot resolution
//!
//! A history is kept in ascending timestamp order from the moment it is built,
//! so resolving "latest snapshot at or before T" is a binary search instead of
//! a sort per query. Histories are rebuilt once per store fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::slice;

/// A value observed at a single point in time
pub trait Timestamped {
    /// Observation time
    fn timestamp(&self) -> DateTime<Utc>;

    /// Whether the observation time has been set
    fn has_timestamp(&self) -> bool {
        !is_unset(&self.timestamp())
    }
}

/// The zero value for snapshot timestamps
pub const UNSET_TIMESTAMP: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Returns true for the zero timestamp
pub fn is_unset(ts: &DateTime<Utc>) -> bool {
    *ts == UNSET_TIMESTAMP
}

/// Resolve the effective snapshot over an unordered slice.
///
/// Stable-sorts a view of the slice newest-first and returns the first entry
/// whose timestamp is not after `at`.
pub fn effective_snapshot<S: Timestamped>(snapshots: &[S], at: DateTime<Utc>) -> Option<&S> {
    let mut newest_first: Vec<&S> = snapshots.iter().collect();
    newest_first.sort_by_key(|s| std::cmp::Reverse(s.timestamp()));
    newest_first.into_iter().find(|s| s.timestamp() <= at)
}

/// Ordered snapshot history of a single entity
#[derive(Debug, Clone, PartialEq)]
pub struct History<S> {
    snapshots: Vec<S>,
}

impl<S> Default for History<S> {
    fn default() -> Self {
        Self {
            snapshots: Vec::new(),
        }
    }
}

impl<S: Timestamped> History<S> {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snapshot at its sorted position.
    ///
    /// A snapshot with the same timestamp as an existing one replaces it,
    /// matching the store where identity is (owner, timestamp).
    pub fn insert(&mut self, snapshot: S) {
        let ts = snapshot.timestamp();
        match self.snapshots.binary_search_by_key(&ts, |s| s.timestamp()) {
            Ok(idx) => self.snapshots[idx] = snapshot,
            Err(idx) => self.snapshots.insert(idx, snapshot),
        }
    }

    /// Latest snapshot whose timestamp is at or before `at`
    pub fn effective_at(&self, at: DateTime<Utc>) -> Option<&S> {
        let idx = self.snapshots.partition_point(|s| s.timestamp() <= at);
        idx.checked_sub(1).and_then(|i| self.snapshots.get(i))
    }

    /// Snapshots with timestamps inside `[begin, end]`, oldest first
    pub fn within(&self, begin: DateTime<Utc>, end: DateTime<Utc>) -> &[S] {
        if begin > end {
            return &[];
        }
        let lo = self.snapshots.partition_point(|s| s.timestamp() < begin);
        let hi = self.snapshots.partition_point(|s| s.timestamp() <= end);
        &self.snapshots[lo..hi]
    }

    /// Most recent snapshot
    pub fn latest(&self) -> Option<&S> {
        self.snapshots.last()
    }

    /// Oldest snapshot
    pub fn earliest(&self) -> Option<&S> {
        self.snapshots.first()
    }

    /// Whether any snapshot lacks a timestamp
    pub fn has_unset_timestamp(&self) -> bool {
        self.snapshots.iter().any(|s| !s.has_timestamp())
    }
}

impl<S> History<S> {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, S> {
        self.snapshots.iter()
    }

    pub fn as_slice(&self) -> &[S] {
        &self.snapshots
    }
}

impl<S: Timestamped> From<Vec<S>> for History<S> {
    fn from(mut snapshots: Vec<S>) -> Self {
        snapshots.sort_by_key(|s| s.timestamp());

        // Later entries win on equal timestamps, as with repeated inserts
        let mut ordered: Vec<S> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            match ordered.last_mut() {
                Some(last) if last.timestamp() == snapshot.timestamp() => *last = snapshot,
                _ => ordered.push(snapshot),
            }
        }

        Self { snapshots: ordered }
    }
}

impl<S: Timestamped> FromIterator<S> for History<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl<'a, S> IntoIterator for &'a History<S> {
    type Item = &'a S;
    type IntoIter = slice::Iter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.iter()
    }
}

impl<S: Serialize> Serialize for History<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        self.snapshots.serialize(serializer)
    }
}

impl<'de, S: Timestamped + Deserialize<'de>> Deserialize<'de> for History<S> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<S>::deserialize(deserializer).map(History::from)
    }
}
