#![forbid(unsafe_code)]

//! Reactive data core for Axon: observable stores, change batches, and
//! indexed collections.
//!
//! This crate provides the key-addressed state primitives every other Axon
//! layer builds on:
//!
//! - [`ObservableStore`]: a mutable `Value` tree addressed by `.`-delimited
//!   key paths, with batched FIFO change delivery, wildcard observation,
//!   and computed (derived) keys.
//! - [`IndexedList`]: an ordered-collection specialization addressable by
//!   possibly negative integer index.
//! - [`ChangeRecord`] / [`ChangeSet`]: the atomic mutation descriptions a
//!   batch delivers, with a read-only query surface.
//! - [`registry::CallbackRegistry`]: the registration machinery shared with
//!   the event layer.
//!
//! # Architecture
//!
//! Stores use `Rc<RefCell<..>>` for single-threaded shared ownership;
//! cloning a store or list yields a handle to the same instance. Observers
//! are `Rc` callbacks compared by identity, so re-registering a clone is a
//! no-op and removal needs no separate token.
//!
//! # Invariants
//!
//! 1. One mutating call produces exactly one record (plus the synthetic
//!    `length` record for structural list mutations); one batch is
//!    delivered as one [`ChangeSet`], FIFO.
//! 2. Mutations issued by observers during delivery join a later batch
//!    (breadth-first delivery, bounded stack depth).
//! 3. Computed keys settle before observer delivery of the batch that
//!    touched their dependencies.
//! 4. The core never catches observer panics; delivery aborts fail-fast.

pub mod change;
pub mod keypath;
pub mod list;
pub mod registry;
pub mod store;

pub use change::{ChangeKind, ChangeRecord, ChangeSet, StoreId};
pub use list::IndexedList;
pub use registry::{CallbackRegistry, WatchKey};
pub use store::{ObservableStore, Observer};

// Re-export the value type observers and collaborators exchange.
pub use serde_json::Value;
