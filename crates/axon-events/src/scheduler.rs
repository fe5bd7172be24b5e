#![forbid(unsafe_code)]

//! Deferred-task queue with virtual time.
//!
//! The [`Scheduler`] stands in for the host event loop's "later turn": work
//! handed to [`defer`](Scheduler::defer) never runs inside the calling
//! stack, only when the owner drains the queue. Time is virtual — a
//! [`Duration`] clock advanced explicitly — so deferred and delayed
//! completion are deterministic under test.
//!
//! The scheduler is an explicit handle passed to whoever needs deferral;
//! there is no ambient thread-local instance.
//!
//! # Invariants
//!
//! 1. Tasks run in (due time, enqueue order) order; two tasks due at the
//!    same instant run FIFO.
//! 2. A draining call also runs tasks scheduled *while* draining, as long
//!    as they are due within the drain's time limit.
//! 3. `now()` never moves backwards.
//!
//! # Failure Modes
//!
//! - A panicking task propagates to the drainer; remaining tasks stay
//!   queued.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

struct Task {
    due: Duration,
    seq: u64,
    job: Box<dyn FnOnce()>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct SchedulerState {
    now: Duration,
    seq: u64,
    queue: BinaryHeap<Reverse<Task>>,
}

/// Single-threaded deferred-task queue with a virtual clock. Cloning
/// yields a shared handle.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<SchedulerState>>,
}

impl Scheduler {
    /// Create a scheduler with the clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerState {
                now: Duration::ZERO,
                seq: 0,
                queue: BinaryHeap::new(),
            })),
        }
    }

    /// The current virtual instant.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Enqueue `job` for the current instant. It runs on the next drain,
    /// never inside the calling stack.
    pub fn defer(&self, job: impl FnOnce() + 'static) {
        let now = self.now();
        self.schedule_at(now, Box::new(job));
    }

    /// Enqueue `job` to run once the clock has advanced by `delay`.
    pub fn defer_after(&self, delay: Duration, job: impl FnOnce() + 'static) {
        let due = self.now() + delay;
        self.schedule_at(due, Box::new(job));
    }

    /// Run every task due at the current instant, including tasks deferred
    /// while draining.
    pub fn run_until_idle(&self) {
        let limit = self.now();
        self.run_due(limit);
    }

    /// Advance the clock by `dt`, running tasks as their due instants are
    /// reached, in (due, FIFO) order.
    pub fn advance(&self, dt: Duration) {
        let target = self.now() + dt;
        self.run_due(target);
        self.inner.borrow_mut().now = target;
    }

    fn schedule_at(&self, due: Duration, job: Box<dyn FnOnce()>) {
        let mut state = self.inner.borrow_mut();
        let seq = state.seq;
        state.seq += 1;
        trace!(target: "axon::scheduler", due_ms = due.as_millis() as u64, seq, "schedule");
        state.queue.push(Reverse(Task { due, seq, job }));
    }

    /// Pop-and-run tasks due at or before `limit`, one at a time so a task
    /// may schedule further work.
    fn run_due(&self, limit: Duration) {
        loop {
            let task = {
                let mut state = self.inner.borrow_mut();
                match state.queue.peek() {
                    Some(Reverse(next)) if next.due <= limit => {
                        let Reverse(task) = state.queue.pop().expect("peeked entry exists");
                        state.now = state.now.max(task.due);
                        Some(task)
                    }
                    _ => None,
                }
            };
            let Some(task) = task else { break };
            (task.job)();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("Scheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}
