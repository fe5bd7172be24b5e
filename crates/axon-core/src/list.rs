#![forbid(unsafe_code)]

//! Ordered-collection specialization of the observable store.
//!
//! An [`IndexedList`] keeps its elements under the reserved store key
//! `items` and addresses them through the store's key syntax (`items.N`,
//! `items.length`). Positional change records are named by the bare literal
//! position acted upon (`"2"`), and every structural mutation that changes
//! the element count emits a synthetic `length` record in the same batch.
//!
//! Negative indices resolve against the current length at call time.
//! Non-numeric keys fall through to the plain store, so a list can carry
//! non-positional attributes alongside its elements.
//!
//! # Invariants
//!
//! 1. Insert/remove do not renumber unrelated prior records; only the
//!    positional record and the `length` record describe the mutation.
//! 2. The positional record and the `length` record of one mutation are
//!    delivered in the same batch, positional first.
//! 3. Out-of-range access degrades to `None`; it never panics.

use serde_json::Value;
use tracing::trace;

use crate::change::ChangeKind;
use crate::store::{ObservableStore, Observer};

/// Reserved store key holding the element array.
pub const ITEMS_KEY: &str = "items";

/// Name of the synthetic count record.
const LENGTH_NAME: &str = "length";

/// Ordered collection over an [`ObservableStore`], addressable by possibly
/// negative integer index. Cloning yields a shared handle.
#[derive(Clone, Debug)]
pub struct IndexedList {
    store: ObservableStore,
}

impl IndexedList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: ObservableStore::with_data([(ITEMS_KEY, Value::Array(Vec::new()))]),
        }
    }

    /// Create a list holding `values`, applied silently.
    #[must_use]
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            store: ObservableStore::with_data([(ITEMS_KEY, Value::Array(values))]),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &ObservableStore {
        &self.store
    }

    /// Element count, read through `items.length`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store
            .get("items.length")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize
    }

    /// Whether the list holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `value`, emitting an `Add` record named by the new index.
    pub fn push(&self, value: Value) {
        let old_len = self.store.with_array_mut(ITEMS_KEY, |items| {
            let len = items.len();
            items.push(value.clone());
            len
        });
        trace!(target: "axon::list", index = old_len, "push");
        self.store.enqueue(self.store.make_record(
            old_len.to_string(),
            ChangeKind::Add,
            None,
            Some(value),
        ));
        self.enqueue_length(old_len, old_len + 1);
        self.store.deliver_change_records();
    }

    /// Splice `value` in at the normalized index (negative resolved against
    /// the current length, clamped to the valid insert range). The record's
    /// `old_value` is whatever previously occupied that slot.
    pub fn insert(&self, index: i64, value: Value) {
        let (position, displaced, old_len) = self.store.with_array_mut(ITEMS_KEY, |items| {
            let len = items.len();
            let position = clamp_insert_index(len, index);
            let displaced = items.get(position).cloned();
            items.insert(position, value.clone());
            (position, displaced, len)
        });
        trace!(target: "axon::list", index = position, "insert");
        self.store.enqueue(self.store.make_record(
            position.to_string(),
            ChangeKind::Add,
            displaced,
            Some(value),
        ));
        self.enqueue_length(old_len, old_len + 1);
        self.store.deliver_change_records();
    }

    /// Splice out the element at `index`, returning it. Out of range is a
    /// no-op returning `None` with no records.
    pub fn remove(&self, index: i64) -> Option<Value> {
        let spliced = self.store.with_array_mut(ITEMS_KEY, |items| {
            let len = items.len();
            let position = resolve_index(len, index)?;
            Some((position, items.remove(position), len))
        });
        let (position, removed, old_len) = spliced?;
        trace!(target: "axon::list", index = position, "remove");
        self.store.enqueue(self.store.make_record(
            position.to_string(),
            ChangeKind::Delete,
            Some(removed.clone()),
            None,
        ));
        self.enqueue_length(old_len, old_len - 1);
        self.store.deliver_change_records();
        Some(removed)
    }

    /// Remove index 0, returning it. The record's `value` is the element
    /// now at index 0, if any.
    pub fn shift(&self) -> Option<Value> {
        let shifted = self.store.with_array_mut(ITEMS_KEY, |items| {
            if items.is_empty() {
                return None;
            }
            let removed = items.remove(0);
            Some((removed, items.first().cloned(), items.len() + 1))
        });
        let (removed, new_head, old_len) = shifted?;
        trace!(target: "axon::list", "shift");
        self.store.enqueue(self.store.make_record(
            "0",
            ChangeKind::Delete,
            Some(removed.clone()),
            new_head,
        ));
        self.enqueue_length(old_len, old_len - 1);
        self.store.deliver_change_records();
        Some(removed)
    }

    /// Overwrite a slot when `key` parses as an integer (negative indices
    /// resolve against the current length); otherwise fall through to the
    /// plain store `set`.
    pub fn set(&self, key: &str, value: Value) {
        match key.parse::<i64>() {
            Ok(index) => self.set_at(index, value),
            Err(_) => self.store.set(key, value),
        }
    }

    /// Overwrite the slot at `index`. Writing past the end pads the gap
    /// with `Null` and counts as a structural mutation. A negative index
    /// beyond the front is a no-op.
    pub fn set_at(&self, index: i64, value: Value) {
        let slot = self.store.with_array_mut(ITEMS_KEY, |items| {
            let len = items.len();
            let position = usize::try_from(if index < 0 { index + len as i64 } else { index }).ok()?;
            let displaced = if position < len {
                Some(std::mem::replace(&mut items[position], value.clone()))
            } else {
                items.resize(position, Value::Null);
                items.push(value.clone());
                None
            };
            Some((position, displaced, len, items.len()))
        });
        let Some((position, displaced, old_len, new_len)) = slot else {
            return;
        };
        let kind = if displaced.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Add
        };
        trace!(target: "axon::list", index = position, kind = ?kind, "set");
        self.store.enqueue(self.store.make_record(
            position.to_string(),
            kind,
            displaced,
            Some(value),
        ));
        self.enqueue_length(old_len, new_len);
        self.store.deliver_change_records();
    }

    /// Read a slot when `key` parses as an integer; otherwise read an
    /// ordinary store key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match key.parse::<i64>() {
            Ok(index) => self.get_at(index),
            Err(_) => self.store.get(key),
        }
    }

    /// Read the element at `index`, resolving negative indices against the
    /// current length.
    #[must_use]
    pub fn get_at(&self, index: i64) -> Option<Value> {
        let position = resolve_index(self.len(), index)?;
        self.store.get(&format!("{ITEMS_KEY}.{position}"))
    }

    /// Register an observer on the underlying store. Positional observers
    /// use the bare index (`"2"`) or `"length"` as their key.
    pub fn observe(&self, observer: &Observer, keys: &[&str]) {
        self.store.observe(observer, keys);
    }

    /// As [`observe`](Self::observe), once-only.
    pub fn observe_once(&self, observer: &Observer, keys: &[&str]) {
        self.store.observe_once(observer, keys);
    }

    /// Remove observer registrations; see
    /// [`ObservableStore::unobserve`].
    pub fn unobserve(&self, observer: &Observer, keys: &[&str]) {
        self.store.unobserve(observer, keys);
    }

    /// Flush any queued records.
    pub fn deliver_change_records(&self) {
        self.store.deliver_change_records();
    }

    /// Queue the synthetic `length` record when the count changed.
    fn enqueue_length(&self, old: usize, new: usize) {
        if old == new {
            return;
        }
        self.store.enqueue(self.store.make_record(
            LENGTH_NAME,
            ChangeKind::Update,
            Some(Value::from(old)),
            Some(Value::from(new)),
        ));
    }
}

impl Default for IndexedList {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a possibly negative access index against `len`.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    let position = usize::try_from(resolved).ok()?;
    (position < len).then_some(position)
}

/// Normalize an insert index: negative resolves against `len`, then clamps
/// to the valid splice range `0..=len`.
fn clamp_insert_index(len: usize, index: i64) -> usize {
    let resolved = if index < 0 { index + len as i64 } else { index };
    usize::try_from(resolved.max(0)).expect("non-negative after max").min(len)
}
