#![forbid(unsafe_code)]

//! Key-addressed observable store with batched, ordered change delivery.
//!
//! An [`ObservableStore`] owns a [`serde_json::Value`] tree addressed by
//! `.`-delimited key paths. Mutations queue [`ChangeRecord`]s; a flush
//! delivers the whole batch as one [`ChangeSet`], record by record, to the
//! observers registered for each record's key and to wildcard observers.
//!
//! # Invariants
//!
//! 1. All records from one mutating call (or one [`set_many`] batch) are
//!    enqueued before any observer runs, and delivered together in FIFO
//!    enqueue order.
//! 2. Per record, key-specific observers fire before wildcard observers,
//!    each group in registration order, each callback at most once per
//!    record.
//! 3. Mutations issued by an observer during delivery are queued and
//!    delivered as a later batch, after the current drain pass completes —
//!    breadth-first, never nested.
//! 4. Computed keys recompute and write their records before observer
//!    delivery for the batch that touched their dependencies, so dependents
//!    observe the up-to-date value within the same batch.
//! 5. Once-only observers are pruned after the delivery pass in which they
//!    ran, never mid-pass.
//!
//! # Failure Modes
//!
//! - A panicking observer or resolver propagates out of
//!   [`deliver_change_records`](ObservableStore::deliver_change_records) and
//!   aborts delivery of the remaining records in that batch.
//! - [`compute`](ObservableStore::compute) without a registered resolver
//!   panics at the call site.

use ahash::{AHashMap, AHashSet};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::change::{ChangeKind, ChangeRecord, ChangeSet, StoreId};
use crate::keypath;
use crate::registry::{CallbackRegistry, Entry, WatchKey};

/// Callback signature for store observers: the record addressed to the
/// observer plus the whole batch it arrived in.
pub type ObserverFn = dyn Fn(&ChangeRecord, &ChangeSet);

/// Resolver producing the value of a computed key from the current store.
pub type ResolverFn = dyn Fn(&ObservableStore) -> Value;

/// A store observer handle.
///
/// Clones share identity: registering a clone of an already-registered
/// observer under the same key is a no-op, and `unobserve` with any clone
/// removes the registration.
#[derive(Clone)]
pub struct Observer {
    callback: Rc<ObserverFn>,
}

impl Observer {
    /// Wrap a callback.
    #[must_use]
    pub fn new(f: impl Fn(&ChangeRecord, &ChangeSet) + 'static) -> Self {
        Self {
            callback: Rc::new(f),
        }
    }

    pub(crate) fn rc(&self) -> &Rc<ObserverFn> {
        &self.callback
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").finish()
    }
}

/// One computed-key declaration.
#[derive(Clone)]
struct ComputedKeyDef {
    name: String,
    deps: Vec<String>,
}

struct StoreInner {
    id: StoreId,
    data: RefCell<Value>,
    observers: RefCell<CallbackRegistry<WatchKey, ObserverFn>>,
    pending: RefCell<VecDeque<ChangeRecord>>,
    delivering: Cell<bool>,
    resolvers: RefCell<AHashMap<String, Rc<ResolverFn>>>,
    computed: RefCell<Vec<ComputedKeyDef>>,
}

/// Resets the in-delivery flag even when an observer panics, so a host that
/// catches the panic does not wedge the store.
struct DeliverGuard<'a>(&'a Cell<bool>);

impl Drop for DeliverGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Key-addressed observable store. Cloning yields a shared handle to the
/// same store.
#[derive(Clone)]
pub struct ObservableStore {
    inner: Rc<StoreInner>,
}

impl ObservableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                id: StoreId::next(),
                data: RefCell::new(Value::Object(serde_json::Map::new())),
                observers: RefCell::new(CallbackRegistry::new()),
                pending: RefCell::new(VecDeque::new()),
                delivering: Cell::new(false),
                resolvers: RefCell::new(AHashMap::new()),
                computed: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a store with initial data, applied as one silent batch: no
    /// records are produced and no observers run.
    #[must_use]
    pub fn with_data<K: AsRef<str>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let store = Self::new();
        {
            let mut data = store.inner.data.borrow_mut();
            for (key, value) in entries {
                keypath::store(&mut data, key.as_ref(), value);
            }
        }
        store
    }

    /// This store's process-unique ID, carried by every record it emits.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// Current value at `path`, or `None` when the path is unoccupied.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        keypath::resolve(&self.inner.data.borrow(), path)
    }

    /// Snapshot clone of the whole data tree, for collaborators that
    /// serialize store state.
    #[must_use]
    pub fn data(&self) -> Value {
        self.inner.data.borrow().clone()
    }

    /// Write `value` at `path` and flush the batch immediately.
    pub fn set(&self, path: &str, value: Value) {
        self.enqueue_set(path, value);
        self.deliver_change_records();
    }

    /// Write `value` at `path` without flushing; the record stays queued
    /// until the next flush.
    pub fn set_silent(&self, path: &str, value: Value) {
        self.enqueue_set(path, value);
    }

    /// Apply every pair, then flush once as a single batch.
    pub fn set_many<K: AsRef<str>>(&self, pairs: impl IntoIterator<Item = (K, Value)>) {
        for (key, value) in pairs {
            self.enqueue_set(key.as_ref(), value);
        }
        self.deliver_change_records();
    }

    /// Apply every pair without flushing.
    pub fn set_many_silent<K: AsRef<str>>(&self, pairs: impl IntoIterator<Item = (K, Value)>) {
        for (key, value) in pairs {
            self.enqueue_set(key.as_ref(), value);
        }
    }

    /// Remove the key at `path` and flush. A missing key is a no-op with no
    /// record.
    pub fn delete(&self, path: &str) {
        let old = {
            let mut data = self.inner.data.borrow_mut();
            keypath::remove(&mut data, path)
        };
        let Some(old) = old else { return };
        trace!(target: "axon::store", key = path, "queue delete");
        self.enqueue(ChangeRecord::new(
            self.inner.id,
            path,
            ChangeKind::Delete,
            Some(old),
            None,
        ));
        self.deliver_change_records();
    }

    /// Register `observer` under each of `keys`, or as a wildcard observer
    /// receiving every record when `keys` is empty. Idempotent per
    /// (key, observer identity).
    pub fn observe(&self, observer: &Observer, keys: &[&str]) {
        self.register(observer, keys, false);
    }

    /// As [`observe`](Self::observe), but the registration self-removes
    /// after the delivery pass in which it first runs.
    pub fn observe_once(&self, observer: &Observer, keys: &[&str]) {
        self.register(observer, keys, true);
    }

    fn register(&self, observer: &Observer, keys: &[&str], once: bool) {
        let mut registry = self.inner.observers.borrow_mut();
        if keys.is_empty() {
            registry.insert(WatchKey::All, Rc::clone(observer.rc()), once);
        } else {
            for key in keys {
                registry.insert(WatchKey::Key((*key).to_owned()), Rc::clone(observer.rc()), once);
            }
        }
    }

    /// Remove `observer`'s registrations for `keys`; with empty `keys`,
    /// remove it from every key it is registered under, wildcard included.
    pub fn unobserve(&self, observer: &Observer, keys: &[&str]) {
        let mut registry = self.inner.observers.borrow_mut();
        if keys.is_empty() {
            registry.remove_everywhere(observer.rc());
        } else {
            for key in keys {
                registry.remove(&WatchKey::Key((*key).to_owned()), observer.rc());
            }
        }
    }

    /// Name a resolver for a computed key. The resolver reads its inputs
    /// back out of the store.
    pub fn register_resolver(&self, name: &str, f: impl Fn(&ObservableStore) -> Value + 'static) {
        self.inner
            .resolvers
            .borrow_mut()
            .insert(name.to_owned(), Rc::new(f));
    }

    /// Declare `name` as derived from `deps`: whenever a flush touches any
    /// dependency, `name` is recomputed and written before observer
    /// delivery for that batch.
    ///
    /// # Panics
    ///
    /// Panics if no resolver named `name` has been registered.
    pub fn compute(&self, name: &str, deps: &[&str]) {
        assert!(
            self.inner.resolvers.borrow().contains_key(name),
            "no resolver registered for computed key `{name}`"
        );
        let deps: Vec<String> = deps.iter().map(|d| (*d).to_owned()).collect();
        let mut computed = self.inner.computed.borrow_mut();
        if let Some(def) = computed.iter_mut().find(|s| s.name == name) {
            def.deps = deps;
        } else {
            computed.push(ComputedKeyDef {
                name: name.to_owned(),
                deps,
            });
        }
    }

    /// Drain the pending queue, delivering each batch as one [`ChangeSet`].
    ///
    /// Re-entrant calls (from observers) return immediately; their records
    /// are picked up by the outer drain loop as subsequent batches.
    pub fn deliver_change_records(&self) {
        if self.inner.delivering.replace(true) {
            return;
        }
        let _guard = DeliverGuard(&self.inner.delivering);
        loop {
            let batch: Vec<ChangeRecord> = self.inner.pending.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                break;
            }
            let batch = self.settle_computed(batch);
            let set = ChangeSet::new(batch);
            debug!(target: "axon::store", records = set.len(), "deliver batch");
            for record in &set {
                for entry in self.targets_for(&record.name) {
                    if entry.is_spent() {
                        continue;
                    }
                    if entry.is_once() {
                        entry.mark_spent();
                    }
                    (entry.callback())(record, &set);
                }
            }
            self.inner.observers.borrow_mut().compact();
        }
    }

    /// Observers due for one record: key-specific first, then wildcard,
    /// de-duplicated by callback identity.
    fn targets_for(&self, name: &str) -> Vec<Rc<Entry<ObserverFn>>> {
        let registry = self.inner.observers.borrow();
        let mut targets = registry.snapshot(&WatchKey::Key(name.to_owned()));
        for wildcard in registry.snapshot(&WatchKey::All) {
            if !targets
                .iter()
                .any(|t| Rc::ptr_eq(t.callback(), wildcard.callback()))
            {
                targets.push(wildcard);
            }
        }
        targets
    }

    /// Recompute every computed key whose dependencies the batch touched,
    /// appending the resulting records to the batch. Chains of computed
    /// keys settle before delivery; each key recomputes at most once.
    fn settle_computed(&self, mut batch: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
        let defs = self.inner.computed.borrow().clone();
        if defs.is_empty() {
            return batch;
        }
        let mut done: AHashSet<&str> = AHashSet::new();
        loop {
            let mut advanced = false;
            for def in &defs {
                if done.contains(def.name.as_str()) {
                    continue;
                }
                let touched = batch
                    .iter()
                    .any(|r| def.deps.iter().any(|d| *d == r.name));
                if !touched {
                    continue;
                }
                done.insert(&def.name);
                let resolver = self
                    .inner
                    .resolvers
                    .borrow()
                    .get(&def.name)
                    .cloned()
                    .expect("resolver presence checked in compute()");
                let value = resolver(self);
                let old = {
                    let mut data = self.inner.data.borrow_mut();
                    keypath::store(&mut data, &def.name, value.clone())
                };
                let kind = if old.is_some() {
                    ChangeKind::Update
                } else {
                    ChangeKind::Add
                };
                trace!(target: "axon::store", key = %def.name, "recompute");
                batch.push(ChangeRecord::new(
                    self.inner.id,
                    def.name.clone(),
                    kind,
                    old,
                    Some(value),
                ));
                advanced = true;
            }
            if !advanced {
                break;
            }
        }
        batch
    }

    fn enqueue_set(&self, path: &str, value: Value) {
        let old = {
            let mut data = self.inner.data.borrow_mut();
            keypath::store(&mut data, path, value.clone())
        };
        let kind = if old.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Add
        };
        trace!(target: "axon::store", key = path, kind = ?kind, "queue change");
        self.enqueue(ChangeRecord::new(
            self.inner.id,
            path,
            kind,
            old,
            Some(value),
        ));
    }

    pub(crate) fn enqueue(&self, record: ChangeRecord) {
        self.inner.pending.borrow_mut().push_back(record);
    }

    pub(crate) fn with_array_mut<R>(&self, path: &str, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let mut data = self.inner.data.borrow_mut();
        f(keypath::array_mut(&mut data, path))
    }

    pub(crate) fn make_record(
        &self,
        name: impl Into<String>,
        kind: ChangeKind,
        old_value: Option<Value>,
        value: Option<Value>,
    ) -> ChangeRecord {
        ChangeRecord::new(self.inner.id, name, kind, old_value, value)
    }
}

impl Default for ObservableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableStore")
            .field("id", &self.inner.id)
            .field("pending", &self.inner.pending.borrow().len())
            .field("observers", &self.inner.observers.borrow().total())
            .finish()
    }
}
