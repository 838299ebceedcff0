use crate::mutex::Mutex;
use crate::op::Operation;
use std::collections::VecDeque;

/// Delivers completed channel operations to their handlers.
///
/// A channel never runs an asynchronous handler itself. It posts the
/// resolved [Operation] here and gives up ownership of it.
///
/// `work_started` is called while the channel's lock is held, so it
/// must not call back into any channel. The posting methods are
/// called after the lock is released and may run the operation
/// inline.
///
/// Operations are matched in arrival order, but two threads racing
/// on one channel may post their completions in either order.
pub trait Scheduler: Send + Sync {
    /// Completes an operation that resolved without suspending.
    fn post_immediate_completion(&self, op: Operation, is_continuation: bool);

    /// Completes an operation that was suspended and previously
    /// counted by [work_started](Scheduler::work_started).
    fn post_deferred_completion(&self, op: Operation);

    /// Records one unit of outstanding work, matched later by exactly
    /// one [post_deferred_completion](Scheduler::post_deferred_completion).
    fn work_started(&self);
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Operation>,
    outstanding: usize,
    continuations: usize,
}

/// A FIFO scheduler that runs posted operations when driven.
///
/// Outstanding work counts every suspended operation and every
/// posted operation that has not run yet. Once it reaches zero
/// nothing further can be delivered through this scheduler.
#[derive(Debug, Default)]
pub struct QueueScheduler {
    state: Mutex<QueueState>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest posted operation. Returns false if none was
    /// queued.
    pub fn run_one(&self) -> bool {
        let Some(op) = self.state.lock().ready.pop_front() else {
            return false;
        };
        // The lock is released so the handler may post again.
        op.complete();
        let mut state = self.state.lock();
        debug_assert!(state.outstanding > 0);
        state.outstanding = state.outstanding.saturating_sub(1);
        true
    }

    /// Runs posted operations, including ones posted by handlers
    /// along the way, until the queue is empty. Returns how many ran.
    pub fn run(&self) -> usize {
        let mut count = 0;
        while self.run_one() {
            count += 1;
        }
        count
    }

    /// Number of posted operations not yet run.
    pub fn pending(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn outstanding_work(&self) -> usize {
        self.state.lock().outstanding
    }

    /// How many immediate completions were posted with the
    /// continuation hint set.
    pub fn continuation_hints(&self) -> usize {
        self.state.lock().continuations
    }
}

impl Scheduler for QueueScheduler {
    fn post_immediate_completion(&self, op: Operation, is_continuation: bool) {
        let mut state = self.state.lock();
        state.outstanding += 1;
        if is_continuation {
            state.continuations += 1;
        }
        state.ready.push_back(op);
    }

    fn post_deferred_completion(&self, op: Operation) {
        self.state.lock().ready.push_back(op);
    }

    fn work_started(&self) {
        self.state.lock().outstanding += 1;
    }
}
