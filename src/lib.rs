#![doc = include_str!("../README.md")]

use futures::channel::oneshot;
use pin_project::pin_project;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

mod error;
mod mutex;
mod op;
mod scheduler;
mod service;
mod state;

pub use error::ChannelError;
pub use error::PutError;
pub use op::Continuation;
pub use op::Handler;
pub use op::OpKind;
pub use op::Operation;
pub use scheduler::QueueScheduler;
pub use scheduler::Scheduler;
pub use service::ChannelId;
pub use service::ChannelService;

use op::Sink;
use service::Shared;
use state::SignalBuffer;

/// Lifecycle and introspection methods shared by [Channel] and
/// [SignalChannel].
macro_rules! channel_lifecycle {
    () => {
        /// This channel's id within its service.
        pub fn id(&self) -> ChannelId {
            self.shared.id()
        }

        /// The maximum number of buffered values, fixed at
        /// construction.
        pub fn capacity(&self) -> usize {
            self.shared.capacity()
        }

        /// Number of values currently buffered.
        pub fn len(&self) -> usize {
            self.shared.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Number of puts waiting for room.
        pub fn waiting_putters(&self) -> usize {
            self.shared.waiting_putters()
        }

        /// Number of gets waiting for a value.
        pub fn waiting_getters(&self) -> usize {
            self.shared.waiting_getters()
        }

        pub fn is_open(&self) -> bool {
            self.shared.is_open()
        }

        /// Reopens a closed channel. Does not release anything by
        /// itself.
        pub fn open(&self) {
            self.shared.open()
        }

        /// Closes the channel.
        ///
        /// Waiting puts and gets fail with
        /// [BrokenChannel](ChannelError::BrokenChannel), as does
        /// every later put. Values already buffered can still be
        /// taken; once they run out, gets fail too. Closing twice is
        /// the same as closing once.
        pub fn close(&self) {
            self.shared.close()
        }

        /// Fails every waiting put and get with
        /// [CancelledOperation](ChannelError::CancelledOperation).
        ///
        /// The channel stays open and keeps its buffered values.
        pub fn cancel(&self) {
            self.shared.cancel()
        }

        /// Whether a get would complete without waiting.
        pub fn ready(&self) -> bool {
            self.shared.ready()
        }

        /// Cancels every waiting operation and unregisters the
        /// channel. Equivalent to dropping it.
        pub fn destroy(self) {
            drop(self)
        }
    };
}

// Channel

/// A bounded channel carrying values of type `T`.
///
/// Constructed by [ChannelService::channel]. All methods take
/// `&self`; share the handle with [Arc] to use it from several
/// threads. Dropping the handle destroys the channel.
pub struct Channel<T: Send + 'static> {
    pub(crate) shared: Arc<Shared<T, VecDeque<T>>>,
}

impl<T: Send + 'static> Channel<T> {
    channel_lifecycle!();

    /// Puts a value, blocking the calling thread while the channel
    /// is full.
    ///
    /// Returns [PutError] with the value if the channel is closed,
    /// or if the put is cancelled while waiting.
    pub fn put(&self, value: T) -> Result<(), PutError<T>> {
        self.shared.put(value)
    }

    /// Puts a value and posts `handler` to the scheduler with the
    /// outcome.
    ///
    /// The handler is never called from inside this method.
    pub fn async_put<H>(&self, value: T, handler: H)
    where
        H: Handler<Result<(), PutError<T>>>,
    {
        self.shared.async_put(value, Sink::handler(handler))
    }

    /// Puts a value, resolving once the scheduler runs the
    /// completion.
    ///
    /// A value that could not be put is dropped; use
    /// [async_put](Channel::async_put) to get it back. If the
    /// scheduler drops the completion unrun, the future resolves to
    /// [CancelledOperation](ChannelError::CancelledOperation).
    ///
    /// Dropping the future while the put is still waiting for room
    /// withdraws it, and its value is never delivered.
    pub fn put_async(&self, value: T) -> Put<T> {
        let (tx, rx) = oneshot::channel();
        self.shared.async_put(value, Sink::Future(tx));
        Put { rx }
    }

    /// Takes a value, blocking the calling thread while the channel
    /// is empty.
    ///
    /// Returns [BrokenChannel](ChannelError::BrokenChannel) once the
    /// channel is closed and drained.
    pub fn get(&self) -> Result<T, ChannelError> {
        self.shared.get()
    }

    /// Takes a value and posts `handler` to the scheduler with the
    /// outcome.
    pub fn async_get<H>(&self, handler: H)
    where
        H: Handler<Result<T, ChannelError>>,
    {
        self.shared.async_get(Sink::handler(handler))
    }

    /// Takes a value, resolving once the scheduler runs the
    /// completion.
    ///
    /// Dropping the future while the get is still waiting withdraws
    /// it. A later put skips it and the value stays in the channel.
    pub fn get_async(&self) -> Get<T> {
        let (tx, rx) = oneshot::channel();
        self.shared.async_get(Sink::Future(tx));
        Get { rx }
    }
}

impl<T: Send + 'static> Drop for Channel<T> {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}

impl<T: Send + 'static> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

// SignalChannel

/// A bounded channel whose puts and gets carry no value.
///
/// Only the number of buffered signals is stored.
pub struct SignalChannel {
    pub(crate) shared: Arc<Shared<(), SignalBuffer>>,
}

/// Adapts a signal handler to the unit-valued put result.
struct SignalPut<H>(H);

impl<H: Handler<Result<(), ChannelError>>> Handler<Result<(), PutError<()>>> for SignalPut<H> {
    fn call(self, result: Result<(), PutError<()>>) {
        self.0.call(result.map_err(PutError::into_cause))
    }

    fn is_continuation(&self) -> bool {
        self.0.is_continuation()
    }
}

impl SignalChannel {
    channel_lifecycle!();

    /// Raises one signal, blocking while the channel is full.
    pub fn put(&self) -> Result<(), ChannelError> {
        self.shared.put(()).map_err(PutError::into_cause)
    }

    pub fn async_put<H>(&self, handler: H)
    where
        H: Handler<Result<(), ChannelError>>,
    {
        self.shared.async_put((), Sink::handler(SignalPut(handler)))
    }

    /// Consumes one signal, blocking while none is available.
    pub fn get(&self) -> Result<(), ChannelError> {
        self.shared.get()
    }

    pub fn async_get<H>(&self, handler: H)
    where
        H: Handler<Result<(), ChannelError>>,
    {
        self.shared.async_get(Sink::handler(handler))
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}

impl fmt::Debug for SignalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalChannel")
            .field("id", &self.id())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

// Futures

/// Future returned by [Channel::put_async].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct Put<T> {
    #[pin]
    rx: oneshot::Receiver<Result<(), PutError<T>>>,
}

impl<T> Future for Put<T> {
    type Output = Result<(), ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().rx.poll(cx).map(|result| match result {
            Ok(result) => result.map_err(PutError::into_cause),
            // The completion was dropped without running.
            Err(oneshot::Canceled) => Err(ChannelError::CancelledOperation),
        })
    }
}

/// Future returned by [Channel::get_async].
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct Get<T> {
    #[pin]
    rx: oneshot::Receiver<Result<T, ChannelError>>,
}

impl<T> Future for Get<T> {
    type Output = Result<T, ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project()
            .rx
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ChannelError::CancelledOperation)))
    }
}
