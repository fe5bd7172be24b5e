#![forbid(unsafe_code)]

//! Shared callback-registration machinery.
//!
//! [`CallbackRegistry`] keeps, per key, an ordered list of `Rc`-identity
//! callbacks. The [`ObservableStore`](crate::store::ObservableStore) keys it
//! by [`WatchKey`]; the event emitter keys it by event identity. Both sides
//! get the same guarantees from one implementation.
//!
//! # Invariants
//!
//! 1. Per-key order is registration order; `prepend` inserts at the front.
//! 2. Inserting a callback already present under a key (same `Rc` identity)
//!    is a no-op.
//! 3. A `once` entry runs at most once: callers mark it spent on first
//!    invocation and [`compact`](CallbackRegistry::compact) removes it after
//!    the pass, never mid-pass.
//! 4. [`snapshot`](CallbackRegistry::snapshot) returns a pass-stable copy:
//!    registrations and removals during a pass do not affect it.

use ahash::AHashMap;
use std::cell::Cell;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

/// Key under which a store observer is registered.
///
/// The wildcard is its own variant, not a reserved string, so it can never
/// collide with a real key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    /// Receive every change record regardless of key.
    All,
    /// Receive records for one key.
    Key(String),
}

/// One registered callback with its once/spent bookkeeping.
pub struct Entry<F: ?Sized> {
    callback: Rc<F>,
    once: bool,
    spent: Cell<bool>,
}

impl<F: ?Sized> Entry<F> {
    fn new(callback: Rc<F>, once: bool) -> Rc<Self> {
        Rc::new(Self {
            callback,
            once,
            spent: Cell::new(false),
        })
    }

    /// The registered callback.
    #[must_use]
    pub fn callback(&self) -> &Rc<F> {
        &self.callback
    }

    /// Whether this entry self-removes after its first invocation.
    #[must_use]
    pub fn is_once(&self) -> bool {
        self.once
    }

    /// Whether this entry already ran as a once-only callback.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.spent.get()
    }

    /// Mark the entry as having run; the next compaction removes it.
    pub fn mark_spent(&self) {
        self.spent.set(true);
    }
}

impl<F: ?Sized> fmt::Debug for Entry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("once", &self.once)
            .field("spent", &self.spent.get())
            .finish()
    }
}

/// Per-key ordered callback lists with identity-based registration.
pub struct CallbackRegistry<K, F: ?Sized> {
    slots: AHashMap<K, Vec<Rc<Entry<F>>>>,
}

impl<K: Eq + Hash, F: ?Sized> CallbackRegistry<K, F> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: AHashMap::new(),
        }
    }

    /// Append `callback` under `key`. Returns `false` (no-op) if the same
    /// callback identity is already registered under that key.
    pub fn insert(&mut self, key: K, callback: Rc<F>, once: bool) -> bool {
        let slot = self.slots.entry(key).or_default();
        if slot.iter().any(|e| Rc::ptr_eq(&e.callback, &callback)) {
            return false;
        }
        slot.push(Entry::new(callback, once));
        true
    }

    /// Insert `callback` at the front of `key`'s list. Same idempotence as
    /// [`insert`](Self::insert).
    pub fn prepend(&mut self, key: K, callback: Rc<F>, once: bool) -> bool {
        let slot = self.slots.entry(key).or_default();
        if slot.iter().any(|e| Rc::ptr_eq(&e.callback, &callback)) {
            return false;
        }
        slot.insert(0, Entry::new(callback, once));
        true
    }

    /// Remove `callback` from `key`'s list. Returns whether it was present.
    pub fn remove(&mut self, key: &K, callback: &Rc<F>) -> bool {
        let Some(slot) = self.slots.get_mut(key) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|e| !Rc::ptr_eq(&e.callback, callback));
        if slot.is_empty() {
            self.slots.remove(key);
        }
        before != self.count(key)
    }

    /// Remove `callback` from every key it is registered under.
    pub fn remove_everywhere(&mut self, callback: &Rc<F>) {
        self.slots
            .values_mut()
            .for_each(|slot| slot.retain(|e| !Rc::ptr_eq(&e.callback, callback)));
        self.slots.retain(|_, slot| !slot.is_empty());
    }

    /// Whether `callback` is registered under `key`.
    #[must_use]
    pub fn is_registered(&self, key: &K, callback: &Rc<F>) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.iter().any(|e| Rc::ptr_eq(&e.callback, callback)))
    }

    /// Pass-stable copy of `key`'s entries, in registration order.
    #[must_use]
    pub fn snapshot(&self, key: &K) -> Vec<Rc<Entry<F>>> {
        self.slots.get(key).cloned().unwrap_or_default()
    }

    /// Drop every `once` entry under `key` without running it.
    pub fn discard_once(&mut self, key: &K) {
        if let Some(slot) = self.slots.get_mut(key) {
            slot.retain(|e| !e.once);
            if slot.is_empty() {
                self.slots.remove(key);
            }
        }
    }

    /// Drop spent entries everywhere. Called after a delivery pass.
    pub fn compact(&mut self) {
        self.slots
            .values_mut()
            .for_each(|slot| slot.retain(|e| !e.spent.get()));
        self.slots.retain(|_, slot| !slot.is_empty());
    }

    /// Number of entries registered under `key`.
    #[must_use]
    pub fn count(&self, key: &K) -> usize {
        self.slots.get(key).map_or(0, Vec::len)
    }

    /// Total number of entries across all keys.
    #[must_use]
    pub fn total(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }
}

impl<K: Eq + Hash, F: ?Sized> Default for CallbackRegistry<K, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, F: ?Sized> fmt::Debug for CallbackRegistry<K, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("keys", &self.slots.len())
            .field("entries", &self.total())
            .finish()
    }
}
