#![forbid(unsafe_code)]

//! Named-event pub/sub with multi-phase hook sequencing.
//!
//! An [`EventEmitter`] reuses the core's callback-registration machinery
//! ([`CallbackRegistry`]) for named events: ordered handler lists per
//! (phase, event), once-only registration, and post-pass compaction. Hook
//! phases are an explicit [`Phase`] enum paired with the event name — never
//! a string prefix spliced onto it.
//!
//! The around phase is an asynchronous gate: participants receive a
//! [`Completion`] token and the sequence proceeds only once every
//! participant has completed, joined through [`AsyncCombinator`].
//!
//! # Invariants
//!
//! 1. `fire` invokes handlers synchronously, in registration order.
//! 2. A once-only handler runs at most once and is compacted out after the
//!    pass it ran in, never mid-pass. A handler registered during a pass
//!    neither runs in that pass nor is pruned before its own first run.
//! 3. An event counts as triggered on its first fire even with zero
//!    handlers registered, so a late `once_immediate` subscriber can
//!    detect it.
//! 4. `fire_around` kick-off is registration order; completion order is
//!    unconstrained. With zero participants, `on_complete` runs on a later
//!    turn, never synchronously within the calling stack.
//!
//! # Failure Modes
//!
//! - A panicking handler propagates to the `fire` caller; remaining
//!   handlers of that pass do not run.
//! - An around participant that never completes stalls its sequence
//!   indefinitely.

use ahash::AHashSet;
use axon_core::registry::CallbackRegistry;
use axon_core::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::combinator::{AsyncCombinator, Completion, Operation};
use crate::scheduler::Scheduler;

/// Hook phase an event fires in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Synchronous preparation hooks.
    Before,
    /// Asynchronous gate; participants hold a [`Completion`] token.
    Around,
    /// The event itself.
    Main,
    /// Synchronous follow-up hooks.
    After,
}

/// What a handler receives: the event identity plus its payload.
#[derive(Debug, Clone)]
pub struct EventCtx {
    /// Event name.
    pub name: String,
    /// Phase this invocation belongs to.
    pub phase: Phase,
    /// Caller-supplied payload; `Value::Null` when the event carries none.
    pub payload: Value,
}

/// Callback signature for plain (before/main/after) handlers.
pub type HandlerFn = dyn Fn(&EventCtx);

/// Callback signature for around-phase participants.
pub type GateFn = dyn Fn(&EventCtx, Completion);

/// A plain handler handle. Clones share identity, so re-registering a
/// clone is a no-op and removal needs no separate token.
#[derive(Clone)]
pub struct Handler {
    callback: Rc<HandlerFn>,
}

impl Handler {
    /// Wrap a callback.
    #[must_use]
    pub fn new(f: impl Fn(&EventCtx) + 'static) -> Self {
        Self {
            callback: Rc::new(f),
        }
    }

    fn rc(&self) -> &Rc<HandlerFn> {
        &self.callback
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish()
    }
}

/// An around-phase participant handle.
#[derive(Clone)]
pub struct GateHandler {
    callback: Rc<GateFn>,
}

impl GateHandler {
    /// Wrap a gate callback.
    #[must_use]
    pub fn new(f: impl Fn(&EventCtx, Completion) + 'static) -> Self {
        Self {
            callback: Rc::new(f),
        }
    }

    fn rc(&self) -> &Rc<GateFn> {
        &self.callback
    }
}

impl fmt::Debug for GateHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateHandler").finish()
    }
}

/// Registry key: phase paired with the event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    phase: Phase,
    name: String,
}

struct EmitterInner {
    callbacks: RefCell<CallbackRegistry<EventKey, HandlerFn>>,
    gates: RefCell<CallbackRegistry<String, GateFn>>,
    triggered: RefCell<AHashSet<(Phase, String)>>,
    scheduler: Scheduler,
}

/// Named-event emitter with before/around/main/after hook sequencing.
/// Cloning yields a shared handle.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Rc<EmitterInner>,
}

impl EventEmitter {
    /// Create an emitter deferring async completion through `scheduler`.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            inner: Rc::new(EmitterInner {
                callbacks: RefCell::new(CallbackRegistry::new()),
                gates: RefCell::new(CallbackRegistry::new()),
                triggered: RefCell::new(AHashSet::new()),
                scheduler,
            }),
        }
    }

    /// The scheduler this emitter defers through.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Append a main-phase registration. Idempotent per
    /// (phase, event, handler identity).
    pub fn on(&self, event: &str, handler: &Handler) {
        self.register(Phase::Main, event, handler, false, false);
    }

    /// Append a registration in `phase` (`Before`, `Main`, or `After`).
    pub fn on_phase(&self, phase: Phase, event: &str, handler: &Handler) {
        self.register(phase, event, handler, false, false);
    }

    /// Prepend a main-phase registration.
    pub fn prepend(&self, event: &str, handler: &Handler) {
        self.register(Phase::Main, event, handler, false, true);
    }

    /// Prepend a registration in `phase`.
    pub fn prepend_phase(&self, phase: Phase, event: &str, handler: &Handler) {
        self.register(phase, event, handler, false, true);
    }

    /// Append a once-only main-phase registration.
    pub fn once(&self, event: &str, handler: &Handler) {
        self.register(Phase::Main, event, handler, true, false);
    }

    /// Append a once-only registration in `phase`.
    pub fn once_phase(&self, phase: Phase, event: &str, handler: &Handler) {
        self.register(phase, event, handler, true, false);
    }

    /// Prepend a once-only main-phase registration.
    pub fn prepend_once(&self, event: &str, handler: &Handler) {
        self.register(Phase::Main, event, handler, true, true);
    }

    /// Once-only registration that runs immediately — synchronously, with a
    /// null payload — instead of registering, when `event` has already
    /// fired at least once.
    pub fn once_immediate(&self, event: &str, handler: &Handler) {
        if self.has_fired(event) {
            trace!(target: "axon::events", event, "immediate once");
            let ctx = EventCtx {
                name: event.to_owned(),
                phase: Phase::Main,
                payload: Value::Null,
            };
            (handler.rc())(&ctx);
            return;
        }
        self.once(event, handler);
    }

    /// Remove a main-phase registration.
    pub fn off(&self, event: &str, handler: &Handler) {
        self.off_phase(Phase::Main, event, handler);
    }

    /// Remove a registration in `phase`.
    pub fn off_phase(&self, phase: Phase, event: &str, handler: &Handler) {
        let key = EventKey {
            phase,
            name: event.to_owned(),
        };
        self.inner.callbacks.borrow_mut().remove(&key, handler.rc());
    }

    /// Remove `handler` from every (phase, event) it is registered under.
    pub fn off_all(&self, handler: &Handler) {
        self.inner
            .callbacks
            .borrow_mut()
            .remove_everywhere(handler.rc());
    }

    /// Register an around-phase participant for `event`.
    pub fn on_around(&self, event: &str, gate: &GateHandler) {
        self.inner
            .gates
            .borrow_mut()
            .insert(event.to_owned(), Rc::clone(gate.rc()), false);
    }

    /// Register a once-only around-phase participant.
    pub fn once_around(&self, event: &str, gate: &GateHandler) {
        self.inner
            .gates
            .borrow_mut()
            .insert(event.to_owned(), Rc::clone(gate.rc()), true);
    }

    /// Remove an around-phase participant.
    pub fn off_around(&self, event: &str, gate: &GateHandler) {
        self.inner
            .gates
            .borrow_mut()
            .remove(&event.to_owned(), gate.rc());
    }

    /// Whether `event` has fired in the main phase at least once,
    /// regardless of whether any handler was registered.
    #[must_use]
    pub fn has_fired(&self, event: &str) -> bool {
        self.has_fired_phase(Phase::Main, event)
    }

    /// Whether `event` has fired in `phase` at least once.
    #[must_use]
    pub fn has_fired_phase(&self, phase: Phase, event: &str) -> bool {
        self.inner
            .triggered
            .borrow()
            .contains(&(phase, event.to_owned()))
    }

    /// Fire `event` in the main phase; see
    /// [`fire_phase`](Self::fire_phase).
    pub fn fire(&self, event: &str, payload: Value) {
        self.fire_phase(Phase::Main, event, payload);
    }

    /// Invoke every handler registered for (`phase`, `event`)
    /// synchronously, in registration order; afterwards compact out the
    /// once-only handlers that ran. Marks the event triggered (idempotent)
    /// even with zero handlers.
    ///
    /// # Panics
    ///
    /// Panics when `phase` is [`Phase::Around`]; the around phase fires
    /// through [`fire_around`](Self::fire_around).
    pub fn fire_phase(&self, phase: Phase, event: &str, payload: Value) {
        assert!(
            phase != Phase::Around,
            "the around phase fires via fire_around"
        );
        self.mark_triggered(phase, event);
        let key = EventKey {
            phase,
            name: event.to_owned(),
        };
        let pass = self.inner.callbacks.borrow().snapshot(&key);
        if pass.is_empty() {
            return;
        }
        debug!(target: "axon::events", event, ?phase, handlers = pass.len(), "fire");
        let ctx = EventCtx {
            name: event.to_owned(),
            phase,
            payload,
        };
        for entry in &pass {
            if entry.is_spent() {
                continue;
            }
            if entry.is_once() {
                entry.mark_spent();
            }
            (entry.callback())(&ctx);
        }
        self.inner.callbacks.borrow_mut().compact();
    }

    /// Run every around participant registered for `event`, removing the
    /// once-only ones from the registry up front, and call `on_complete`
    /// once all have completed. Kick-off is registration order; completion
    /// order is unconstrained. With zero participants, `on_complete` is
    /// deferred — never run synchronously within the calling stack.
    pub fn fire_around(&self, event: &str, payload: Value, on_complete: impl FnOnce() + 'static) {
        self.mark_triggered(Phase::Around, event);
        let key = event.to_owned();
        let pass = {
            let mut gates = self.inner.gates.borrow_mut();
            let pass = gates.snapshot(&key);
            gates.discard_once(&key);
            pass
        };
        debug!(target: "axon::events", event, participants = pass.len(), "fire around");
        let ctx = Rc::new(EventCtx {
            name: event.to_owned(),
            phase: Phase::Around,
            payload,
        });
        let operations: Vec<Operation> = pass
            .iter()
            .map(|entry| {
                let callback = Rc::clone(entry.callback());
                let ctx = Rc::clone(&ctx);
                Box::new(move |completion: Completion| callback(&ctx, completion)) as Operation
            })
            .collect();
        AsyncCombinator::new(self.inner.scheduler.clone()).run(operations, on_complete);
    }

    /// Three-phase protocol: fire the before hooks, gate on the around
    /// participants, then — once the gate clears — run `body`, fire the
    /// event itself, and fire the after hooks.
    pub fn fire_sequence(&self, event: &str, payload: Value, body: impl FnOnce() + 'static) {
        self.fire_phase(Phase::Before, event, payload.clone());
        let emitter = self.clone();
        let name = event.to_owned();
        let tail_payload = payload.clone();
        self.fire_around(event, payload, move || {
            body();
            emitter.fire_phase(Phase::Main, &name, tail_payload.clone());
            emitter.fire_phase(Phase::After, &name, tail_payload);
        });
    }

    fn register(&self, phase: Phase, event: &str, handler: &Handler, once: bool, front: bool) {
        assert!(
            phase != Phase::Around,
            "around participants register via on_around"
        );
        let key = EventKey {
            phase,
            name: event.to_owned(),
        };
        let mut callbacks = self.inner.callbacks.borrow_mut();
        if front {
            callbacks.prepend(key, Rc::clone(handler.rc()), once);
        } else {
            callbacks.insert(key, Rc::clone(handler.rc()), once);
        }
    }

    fn mark_triggered(&self, phase: Phase, event: &str) {
        self.inner
            .triggered
            .borrow_mut()
            .insert((phase, event.to_owned()));
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("handlers", &self.inner.callbacks.borrow().total())
            .field("gates", &self.inner.gates.borrow().total())
            .field("triggered", &self.inner.triggered.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    fn emitter() -> EventEmitter {
        EventEmitter::new(Scheduler::new())
    }

    fn labelled(log: &Rc<RefCell<Vec<String>>>, label: &str) -> Handler {
        let log = Rc::clone(log);
        let label = label.to_owned();
        Handler::new(move |_ctx: &EventCtx| log.borrow_mut().push(label.clone()))
    }

    #[test]
    fn fire_runs_handlers_in_registration_order() {
        let emitter = emitter();
        let order = Rc::new(RefCell::new(Vec::new()));
        emitter.on("save", &labelled(&order, "first"));
        emitter.on("save", &labelled(&order, "second"));
        emitter.prepend("save", &labelled(&order, "zeroth"));
        emitter.fire("save", Value::Null);
        assert_eq!(*order.borrow(), vec!["zeroth", "first", "second"]);
    }

    #[test]
    fn handlers_receive_the_payload() {
        let emitter = emitter();
        let seen = Rc::new(RefCell::new(Value::Null));
        let log = Rc::clone(&seen);
        emitter.on(
            "save",
            &Handler::new(move |ctx: &EventCtx| {
                assert_eq!(ctx.name, "save");
                assert_eq!(ctx.phase, Phase::Main);
                *log.borrow_mut() = ctx.payload.clone();
            }),
        );
        emitter.fire("save", json!({"path": "/tmp/x"}));
        assert_eq!(*seen.borrow(), json!({"path": "/tmp/x"}));
    }

    #[test]
    fn registration_is_idempotent_per_phase_and_event() {
        let emitter = emitter();
        let count = Rc::new(Cell::new(0));
        let log = Rc::clone(&count);
        let handler = Handler::new(move |_: &EventCtx| log.set(log.get() + 1));
        emitter.on("save", &handler);
        emitter.on("save", &handler.clone());
        emitter.fire("save", Value::Null);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn once_runs_exactly_once_and_compacts_after_the_pass() {
        let emitter = emitter();
        let count = Rc::new(Cell::new(0));
        let log = Rc::clone(&count);
        emitter.once("save", &Handler::new(move |_: &EventCtx| log.set(log.get() + 1)));
        emitter.fire("save", Value::Null);
        emitter.fire("save", Value::Null);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn once_added_during_a_pass_waits_for_the_next_fire() {
        let emitter = emitter();
        let count = Rc::new(Cell::new(0));
        let inner_count = Rc::clone(&count);
        let registrar = emitter.clone();
        emitter.on(
            "save",
            &Handler::new(move |_: &EventCtx| {
                let log = Rc::clone(&inner_count);
                registrar.once("save", &Handler::new(move |_: &EventCtx| log.set(log.get() + 1)));
            }),
        );
        emitter.fire("save", Value::Null);
        assert_eq!(count.get(), 0, "not invoked by the pass that added it");
        emitter.fire("save", Value::Null);
        assert_eq!(count.get(), 1, "survives to its own first run");
        emitter.fire("save", Value::Null);
        assert_eq!(count.get(), 2, "each pass registers one more once-handler");
    }

    #[test]
    fn once_immediate_after_the_fact_runs_synchronously_and_never_again() {
        let emitter = emitter();
        emitter.fire("ready", Value::Null);

        let count = Rc::new(Cell::new(0));
        let log = Rc::clone(&count);
        let handler = Handler::new(move |_: &EventCtx| log.set(log.get() + 1));
        emitter.once_immediate("ready", &handler);
        assert_eq!(count.get(), 1, "runs synchronously at registration");

        emitter.fire("ready", Value::Null);
        assert_eq!(count.get(), 1, "was never registered");
    }

    #[test]
    fn once_immediate_before_the_fact_registers_as_once() {
        let emitter = emitter();
        let count = Rc::new(Cell::new(0));
        let log = Rc::clone(&count);
        emitter.once_immediate(
            "ready",
            &Handler::new(move |_: &EventCtx| log.set(log.get() + 1)),
        );
        assert_eq!(count.get(), 0);
        emitter.fire("ready", Value::Null);
        emitter.fire("ready", Value::Null);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn triggered_without_handlers_is_still_detectable() {
        let emitter = emitter();
        assert!(!emitter.has_fired("boot"));
        emitter.fire("boot", Value::Null);
        assert!(emitter.has_fired("boot"));
    }

    #[test]
    fn phases_are_distinct_registrations() {
        let emitter = emitter();
        let order = Rc::new(RefCell::new(Vec::new()));
        emitter.on_phase(Phase::Before, "render", &labelled(&order, "before"));
        emitter.on("render", &labelled(&order, "main"));
        emitter.fire("render", Value::Null);
        assert_eq!(
            *order.borrow(),
            vec!["main"],
            "a main fire does not reach before-phase handlers"
        );
    }

    #[test]
    fn off_removes_a_registration() {
        let emitter = emitter();
        let order = Rc::new(RefCell::new(Vec::new()));
        let handler = labelled(&order, "gone");
        emitter.on("save", &handler);
        emitter.off("save", &handler);
        emitter.fire("save", Value::Null);
        assert!(order.borrow().is_empty());
    }

    #[test]
    #[should_panic(expected = "around phase fires via fire_around")]
    fn plain_fire_rejects_the_around_phase() {
        emitter().fire_phase(Phase::Around, "render", Value::Null);
    }

    #[test]
    fn fire_around_with_zero_participants_defers_completion() {
        let scheduler = Scheduler::new();
        let emitter = EventEmitter::new(scheduler.clone());
        let done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&done);
        emitter.fire_around("render", Value::Null, move || flag.set(true));
        assert!(!done.get(), "not in the same synchronous call");
        scheduler.run_until_idle();
        assert!(done.get(), "runs after yielding control");
    }

    #[test]
    fn fire_around_waits_for_every_participant() {
        let scheduler = Scheduler::new();
        let emitter = EventEmitter::new(scheduler.clone());
        for delay_ms in [30u64, 10, 20] {
            let timer = scheduler.clone();
            emitter.on_around(
                "load",
                &GateHandler::new(move |_: &EventCtx, completion: Completion| {
                    timer.defer_after(std::time::Duration::from_millis(delay_ms), move || {
                        completion.complete();
                    });
                }),
            );
        }
        let done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&done);
        emitter.fire_around("load", Value::Null, move || flag.set(true));

        scheduler.advance(std::time::Duration::from_millis(29));
        assert!(!done.get(), "never earlier than the slowest participant");
        scheduler.advance(std::time::Duration::from_millis(1));
        assert!(done.get());
    }

    #[test]
    fn once_around_participants_are_removed_up_front() {
        let scheduler = Scheduler::new();
        let emitter = EventEmitter::new(scheduler.clone());
        let runs = Rc::new(Cell::new(0));
        let log = Rc::clone(&runs);
        emitter.once_around(
            "load",
            &GateHandler::new(move |_: &EventCtx, completion: Completion| {
                log.set(log.get() + 1);
                completion.complete();
            }),
        );
        emitter.fire_around("load", Value::Null, || {});
        emitter.fire_around("load", Value::Null, || {});
        scheduler.run_until_idle();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn fire_sequence_orders_all_phases() {
        let scheduler = Scheduler::new();
        let emitter = EventEmitter::new(scheduler.clone());
        let order = Rc::new(RefCell::new(Vec::new()));
        emitter.on_phase(Phase::Before, "render", &labelled(&order, "before"));
        emitter.on("render", &labelled(&order, "main"));
        emitter.on_phase(Phase::After, "render", &labelled(&order, "after"));
        let log = Rc::clone(&order);
        emitter.on_around(
            "render",
            &GateHandler::new(move |_: &EventCtx, completion: Completion| {
                log.borrow_mut().push("around".to_owned());
                completion.complete();
            }),
        );
        let log = Rc::clone(&order);
        emitter.fire_sequence("render", Value::Null, move || {
            log.borrow_mut().push("body".to_owned());
        });
        assert_eq!(
            *order.borrow(),
            vec!["before", "around", "body", "main", "after"]
        );
    }
}
