#![forbid(unsafe_code)]

//! Event layer for Axon: named-event pub/sub, hook phases, and async join
//! primitives.
//!
//! - [`EventEmitter`]: pub/sub over the core's callback registry, with
//!   once-only registration, triggered-event tracking, and
//!   before/around/main/after hook sequencing.
//! - [`AsyncCombinator`]: join primitive signalling once N
//!   continuation-style operations have all completed.
//! - [`Scheduler`]: explicit deferred-task queue with virtual time; the
//!   "later turn" that async completion contracts are written against.
//!
//! # Invariants
//!
//! 1. `fire` is synchronous and registration-ordered; around-phase
//!    completion order is unconstrained.
//! 2. Zero-participant completion (empty combinator list, empty around
//!    registration) is always deferred through the scheduler, never run
//!    inside the calling stack.
//! 3. Once-only handlers run at most once and are compacted after the
//!    pass they ran in.

pub mod combinator;
pub mod emitter;
pub mod scheduler;

pub use combinator::{AsyncCombinator, Completion, Operation};
pub use emitter::{EventCtx, EventEmitter, GateFn, GateHandler, Handler, HandlerFn, Phase};
pub use scheduler::Scheduler;
