#![forbid(unsafe_code)]

//! Axon public facade.
//!
//! Re-exports the reactive data core ([`axon_core`]) and the event layer
//! ([`axon_events`]) under one roof. Most applications only need the
//! [`prelude`]:
//!
//! ```
//! use axon::prelude::*;
//! use serde_json::json;
//!
//! let store = ObservableStore::new();
//! let observer = Observer::new(|record: &ChangeRecord, _: &ChangeSet| {
//!     println!("{} changed", record.name);
//! });
//! store.observe(&observer, &["title"]);
//! store.set("title", json!("Inbox"));
//! ```

pub use axon_core::{
    ChangeKind, ChangeRecord, ChangeSet, IndexedList, ObservableStore, Observer, StoreId, Value,
};
pub use axon_events::{
    AsyncCombinator, Completion, EventCtx, EventEmitter, GateHandler, Handler, Phase, Scheduler,
};

/// Everything an application typically imports.
pub mod prelude {
    pub use axon_core::{
        ChangeKind, ChangeRecord, ChangeSet, IndexedList, ObservableStore, Observer, StoreId,
        Value,
    };
    pub use axon_events::{
        AsyncCombinator, Completion, EventCtx, EventEmitter, GateHandler, Handler, Phase,
        Scheduler,
    };
}
