#![forbid(unsafe_code)]

//! Join primitive for continuation-style operations.
//!
//! [`AsyncCombinator::run`] kicks off every operation in list order, handing
//! each a [`Completion`] token. Operations complete synchronously or after
//! arbitrary (virtual) delay; arrival order is unconstrained. `on_complete`
//! fires exactly once, after the last arrival.
//!
//! # Invariants
//!
//! 1. Operations are invoked in list order.
//! 2. `Completion::complete` consumes the token, so one participant cannot
//!    report twice.
//! 3. With zero operations, `on_complete` is deferred through the
//!    [`Scheduler`] — never invoked synchronously within the calling stack.
//!    This matches `fire_around`'s empty-registration timing; the two share
//!    one policy.
//!
//! # Failure Modes
//!
//! - A participant that drops its token without completing stalls
//!   `on_complete` indefinitely. No timeout is provided.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

use crate::scheduler::Scheduler;

/// One continuation-style operation: receives its completion token when
/// kicked off.
pub type Operation = Box<dyn FnOnce(Completion)>;

struct JoinState {
    total: usize,
    done: Cell<usize>,
    on_each: Option<Box<dyn Fn(usize)>>,
    on_complete: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl JoinState {
    fn arrive(&self) {
        let done = self.done.get() + 1;
        self.done.set(done);
        trace!(target: "axon::combinator", done, total = self.total, "arrival");
        if let Some(on_each) = &self.on_each {
            on_each(done);
        }
        if done == self.total {
            let on_complete = self.on_complete.borrow_mut().take();
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        }
    }
}

/// Completion token handed to each operation. Consumed by
/// [`complete`](Completion::complete).
pub struct Completion {
    state: Rc<JoinState>,
}

impl Completion {
    /// Report this participant as done.
    pub fn complete(self) {
        self.state.arrive();
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.state.done.get())
            .field("total", &self.state.total)
            .finish()
    }
}

/// Invokes N operations and signals once all N have reported.
#[derive(Clone, Debug)]
pub struct AsyncCombinator {
    scheduler: Scheduler,
}

impl AsyncCombinator {
    /// Create a combinator deferring empty-list completion through
    /// `scheduler`.
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Run `operations`, calling `on_complete` exactly once after every one
    /// has completed.
    pub fn run(&self, operations: Vec<Operation>, on_complete: impl FnOnce() + 'static) {
        self.launch(operations, Box::new(on_complete), None);
    }

    /// As [`run`](Self::run), additionally calling `on_each` with the
    /// arrival count after each individual completion.
    pub fn run_with_progress(
        &self,
        operations: Vec<Operation>,
        on_complete: impl FnOnce() + 'static,
        on_each: impl Fn(usize) + 'static,
    ) {
        self.launch(operations, Box::new(on_complete), Some(Box::new(on_each)));
    }

    fn launch(
        &self,
        operations: Vec<Operation>,
        on_complete: Box<dyn FnOnce()>,
        on_each: Option<Box<dyn Fn(usize)>>,
    ) {
        if operations.is_empty() {
            trace!(target: "axon::combinator", "no operations; deferring completion");
            self.scheduler.defer(on_complete);
            return;
        }
        let state = Rc::new(JoinState {
            total: operations.len(),
            done: Cell::new(0),
            on_each,
            on_complete: RefCell::new(Some(on_complete)),
        });
        for operation in operations {
            operation(Completion {
                state: Rc::clone(&state),
            });
        }
    }
}
