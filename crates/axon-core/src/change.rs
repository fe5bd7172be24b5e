#![forbid(unsafe_code)]

//! Change records and the batch query surface.
//!
//! Every mutating store call produces exactly one [`ChangeRecord`]. Records
//! are queued and delivered together as one [`ChangeSet`] per batch, in FIFO
//! enqueue order. A record is immutable after creation and consumed exactly
//! once during delivery.
//!
//! # Invariants
//!
//! 1. `ChangeSet::get` returns the **last** record for a name — last write
//!    wins within a batch.
//! 2. `names()` preserves first-occurrence order and never repeats a name.
//! 3. The set is read-only relative to the batch that produced it.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for unique store IDs.
static STORE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of the store a record originated from.
///
/// Stands in for an owned back-reference to the source store, which records
/// could not carry and stay serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocate the next unique store ID.
    pub(crate) fn next() -> Self {
        Self(STORE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// What a mutation did to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The key was absent before the mutation.
    Add,
    /// The key was present and its value was replaced.
    Update,
    /// The key was removed.
    Delete,
}

/// Atomic description of one key's before/after state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    /// The key (or list position, or synthetic `length`) acted upon.
    pub name: String,
    /// What the mutation did.
    pub kind: ChangeKind,
    /// The store the record originated from.
    pub store: StoreId,
    /// Value before the mutation; `None` when the key was absent.
    pub old_value: Option<Value>,
    /// Value after the mutation; `None` for deletions.
    pub value: Option<Value>,
}

impl ChangeRecord {
    /// Create a record. Records are immutable after creation.
    #[must_use]
    pub fn new(
        store: StoreId,
        name: impl Into<String>,
        kind: ChangeKind,
        old_value: Option<Value>,
        value: Option<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            store,
            old_value,
            value,
        }
    }
}

/// Ordered, read-only view over the records of one mutation batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    records: Vec<ChangeRecord>,
}

impl ChangeSet {
    /// Wrap a batch of records, preserving their enqueue order.
    #[must_use]
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self { records }
    }

    /// Whether any record touches `name`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    /// Whether any record touches any of `names`.
    #[must_use]
    pub fn has_any(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has(n))
    }

    /// Whether every one of `names` is touched by some record.
    #[must_use]
    pub fn has_all(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.has(n))
    }

    /// The last record for `name` — last write wins within a batch.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ChangeRecord> {
        self.records.iter().rev().find(|r| r.name == name)
    }

    /// The first record matching `predicate`.
    pub fn query(&self, predicate: impl Fn(&ChangeRecord) -> bool) -> Option<&ChangeRecord> {
        self.records.iter().find(|r| predicate(r))
    }

    /// All records matching `predicate`, in batch order.
    pub fn query_all(&self, predicate: impl Fn(&ChangeRecord) -> bool) -> Vec<&ChangeRecord> {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    /// Unique keys touched by the batch, in first-occurrence order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for record in &self.records {
            if !seen.contains(&record.name.as_str()) {
                seen.push(record.name.as_str());
            }
        }
        seen
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate the records in batch order.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter()
    }

    /// The raw record slice, in batch order.
    #[must_use]
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ChangeRecord;
    type IntoIter = std::slice::Iter<'a, ChangeRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
