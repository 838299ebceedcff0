//! Suspended put and get requests, and the completions they turn
//! into once resolved.

use crate::error::ChannelError;
use crate::error::PutError;
use crate::mutex::Condvar;
use crate::mutex::Mutex;
use futures::channel::oneshot;
use std::fmt;
use std::sync::Arc;

/// Receives the outcome of an asynchronous put or get.
///
/// Implemented for every `FnOnce(R) + Send + 'static` closure. Wrap
/// a closure in [Continuation] when it is issued from inside another
/// completion on the same logical chain.
pub trait Handler<R>: Send + 'static {
    /// Consumes the handler with the operation's outcome.
    fn call(self, result: R);

    /// Scheduling hint forwarded to
    /// [Scheduler::post_immediate_completion](crate::Scheduler::post_immediate_completion).
    /// Has no effect on channel semantics.
    fn is_continuation(&self) -> bool {
        false
    }
}

impl<R, F> Handler<R> for F
where
    F: FnOnce(R) + Send + 'static,
{
    fn call(self, result: R) {
        self(result)
    }
}

/// Marks a closure as continuing the current completion chain.
#[derive(Clone, Copy, Debug)]
pub struct Continuation<F>(pub F);

impl<R, F> Handler<R> for Continuation<F>
where
    F: FnOnce(R) + Send + 'static,
{
    fn call(self, result: R) {
        (self.0)(result)
    }

    fn is_continuation(&self) -> bool {
        true
    }
}

/// Which side of the channel an [Operation] came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum OpKind {
    Put,
    Get,
}

/// A resolved channel operation, owned by the scheduler once posted.
///
/// Running [complete](Operation::complete) invokes the caller's
/// handler with the operation's outcome. Dropping an operation
/// without completing it drops the handler and, for puts, the
/// undelivered value.
#[must_use = "a posted operation does nothing until completed"]
pub struct Operation {
    kind: OpKind,
    run: Box<dyn FnOnce() + Send>,
}

impl Operation {
    fn new(kind: OpKind, run: impl FnOnce() + Send + 'static) -> Self {
        Operation {
            kind,
            run: Box::new(run),
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Delivers the outcome to the waiting handler.
    pub fn complete(self) {
        (self.run)()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Parks a blocked thread until its one operation resolves.
pub(crate) struct Waiter<R> {
    slot: Mutex<Option<R>>,
    ready: Condvar,
}

impl<R> Waiter<R> {
    pub(crate) fn new() -> Self {
        Waiter {
            slot: Mutex::new(None),
            ready: Condvar::default(),
        }
    }

    fn complete(&self, result: R) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "operation completed twice");
        *slot = Some(result);
        // Only one thread ever waits on a given waiter.
        self.ready.notify_one();
    }

    pub(crate) fn wait(&self) -> R {
        let mut slot = self.ready.wait_while(self.slot.lock(), |s| s.is_none());
        match slot.take() {
            Some(result) => result,
            None => unreachable!("waiter woke without a result"),
        }
    }
}

/// Where an operation's outcome goes.
pub(crate) enum Sink<R> {
    Handler {
        call: Box<dyn FnOnce(R) + Send>,
        is_continuation: bool,
    },
    Blocking(Arc<Waiter<R>>),
    /// Feeds a [Put](crate::Put) or [Get](crate::Get) future.
    Future(oneshot::Sender<R>),
}

impl<R: Send + 'static> Sink<R> {
    pub(crate) fn handler<H: Handler<R>>(handler: H) -> Self {
        let is_continuation = handler.is_continuation();
        Sink::Handler {
            call: Box::new(move |result| handler.call(result)),
            is_continuation,
        }
    }

    fn is_async(&self) -> bool {
        !matches!(self, Sink::Blocking(_))
    }

    /// Whether nobody is left to receive the outcome.
    fn is_withdrawn(&self) -> bool {
        match self {
            Sink::Future(tx) => tx.is_canceled(),
            _ => false,
        }
    }

    fn finish(self, kind: OpKind, result: R) -> Completion {
        match self {
            Sink::Handler {
                call,
                is_continuation,
            } => Completion {
                op: Operation::new(kind, move || call(result)),
                route: Route::Scheduler { is_continuation },
            },
            Sink::Blocking(waiter) => Completion {
                op: Operation::new(kind, move || waiter.complete(result)),
                route: Route::Inline,
            },
            Sink::Future(tx) => Completion {
                op: Operation::new(kind, move || {
                    // The future may have been dropped since.
                    _ = tx.send(result);
                }),
                route: Route::Scheduler {
                    is_continuation: false,
                },
            },
        }
    }
}

/// How a resolved operation reaches its caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Route {
    /// Posted to the scheduler.
    Scheduler { is_continuation: bool },
    /// Completed in place, waking a blocked thread.
    Inline,
}

/// An operation whose outcome is decided but not yet delivered.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) op: Operation,
    pub(crate) route: Route,
}

/// A put request. Owns the value until it is handed to a getter,
/// buffered, or failed.
pub(crate) struct PutOperation<T> {
    value: T,
    sink: Sink<Result<(), PutError<T>>>,
}

impl<T: Send + 'static> PutOperation<T> {
    pub(crate) fn new(value: T, sink: Sink<Result<(), PutError<T>>>) -> Self {
        PutOperation { value, sink }
    }

    /// Whether suspending this request counts as outstanding
    /// scheduler work.
    pub(crate) fn is_async(&self) -> bool {
        self.sink.is_async()
    }

    /// Whether the future awaiting this put was dropped.
    pub(crate) fn is_withdrawn(&self) -> bool {
        self.sink.is_withdrawn()
    }

    /// Takes the value out and resolves the request successfully.
    pub(crate) fn hand_off(self) -> (T, Completion) {
        (self.value, self.sink.finish(OpKind::Put, Ok(())))
    }

    pub(crate) fn fail(self, cause: ChannelError) -> Completion {
        let result = Err(PutError::new(self.value, cause));
        self.sink.finish(OpKind::Put, result)
    }
}

impl<T> fmt::Debug for PutOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutOperation").finish_non_exhaustive()
    }
}

/// A get request. Resolved exactly once, with a value or an error.
pub(crate) struct GetOperation<T> {
    sink: Sink<Result<T, ChannelError>>,
}

impl<T: Send + 'static> GetOperation<T> {
    pub(crate) fn new(sink: Sink<Result<T, ChannelError>>) -> Self {
        GetOperation { sink }
    }

    pub(crate) fn is_async(&self) -> bool {
        self.sink.is_async()
    }

    pub(crate) fn is_withdrawn(&self) -> bool {
        self.sink.is_withdrawn()
    }

    pub(crate) fn deliver(self, value: T) -> Completion {
        self.sink.finish(OpKind::Get, Ok(value))
    }

    pub(crate) fn fail(self, cause: ChannelError) -> Completion {
        self.sink.finish(OpKind::Get, Err(cause))
    }
}

impl<T> fmt::Debug for GetOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOperation").finish_non_exhaustive()
    }
}
