use crate::error::ChannelError;
use crate::error::PutError;
use crate::mutex::Mutex;
use crate::op::GetOperation;
use crate::op::PutOperation;
use crate::op::Route;
use crate::op::Sink;
use crate::op::Waiter;
use crate::scheduler::Scheduler;
use crate::state::Buffer;
use crate::state::ChannelState;
use crate::state::Posting;
use crate::state::Postings;
use crate::state::SignalBuffer;
use crate::Channel;
use crate::SignalChannel;
use log::debug;
use log::trace;
use log::warn;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::Weak;

/// Identifies a live channel within its [ChannelService].
///
/// Ids of destroyed channels are reused.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChannelId(usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the registry needs from a channel of any payload type.
trait Registered: Send + Sync {
    fn shut_down(&self);
}

/// Non-owning references to every live channel.
#[derive(Default)]
struct Registry {
    channels: Vec<Option<Weak<dyn Registered>>>,
    available_indices: Vec<usize>,
}

impl Registry {
    fn register(&mut self, channel: Weak<dyn Registered>) -> ChannelId {
        if let Some(index) = self.available_indices.pop() {
            self.channels[index] = Some(channel);
            ChannelId(index)
        } else {
            self.channels.push(Some(channel));
            ChannelId(self.channels.len() - 1)
        }
    }

    fn unregister(&mut self, id: ChannelId) {
        match self.channels.get_mut(id.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                self.available_indices.push(id.0);
            }
            _ => warn!("channel {id} was not registered"),
        }
    }

    fn len(&self) -> usize {
        self.channels.len() - self.available_indices.len()
    }

    fn live(&self) -> Vec<Arc<dyn Registered>> {
        self.channels
            .iter()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

struct ServiceInner {
    scheduler: Arc<dyn Scheduler>,
    // Only guards the registry. Never held during put/get matching.
    registry: Mutex<Registry>,
}

/// Owns the registry of live channels and routes their completions
/// to a [Scheduler].
///
/// Cloning yields another handle to the same service.
#[derive(Clone)]
pub struct ChannelService {
    inner: Arc<ServiceInner>,
}

impl ChannelService {
    pub fn new<S: Scheduler + 'static>(scheduler: Arc<S>) -> Self {
        ChannelService {
            inner: Arc::new(ServiceInner {
                scheduler,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Constructs an open channel that buffers up to `capacity`
    /// values.
    ///
    /// With a capacity of zero every put either hands its value
    /// directly to a waiting getter or waits for one.
    pub fn channel<T: Send + 'static>(&self, capacity: usize) -> Channel<T> {
        Channel {
            shared: Shared::construct(self.inner.clone(), capacity, VecDeque::new()),
        }
    }

    /// Constructs an open channel whose puts and gets carry no value.
    pub fn signal_channel(&self, capacity: usize) -> SignalChannel {
        SignalChannel {
            shared: Shared::construct(self.inner.clone(), capacity, SignalBuffer::default()),
        }
    }

    /// Number of channels constructed and not yet destroyed.
    pub fn channel_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Closes every live channel and cancels its waiting operations.
    ///
    /// Channels stay registered until their handles are dropped.
    /// Values still buffered can be drained.
    pub fn shutdown(&self) {
        // Collect under the registry lock, then release it before any
        // channel lock is taken.
        let live = self.inner.registry.lock().live();
        debug!("shutting down {} channels", live.len());
        for channel in live {
            channel.shut_down();
        }
    }
}

impl fmt::Debug for ChannelService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelService")
            .field("channel_count", &self.channel_count())
            .finish()
    }
}

/// A registered channel: its state behind its own lock.
pub(crate) struct Shared<T, B> {
    id: ChannelId,
    service: Arc<ServiceInner>,
    state: Mutex<ChannelState<T, B>>,
}

impl<T, B> Shared<T, B>
where
    T: Send + 'static,
    B: Buffer<T> + 'static,
{
    fn construct(service: Arc<ServiceInner>, capacity: usize, buffer: B) -> Arc<Self> {
        let shared = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak: Weak<dyn Registered> = weak.clone();
            let id = service.registry.lock().register(weak);
            Shared {
                id,
                service: service.clone(),
                state: Mutex::new(ChannelState::new(capacity, buffer)),
            }
        });
        debug!("channel {} constructed with capacity {capacity}", shared.id);
        shared
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity()
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub(crate) fn waiting_putters(&self) -> usize {
        self.state.lock().waiting_putters()
    }

    pub(crate) fn waiting_getters(&self) -> usize {
        self.state.lock().waiting_getters()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().is_open()
    }

    pub(crate) fn ready(&self) -> bool {
        self.state.lock().ready()
    }

    pub(crate) fn open(&self) {
        self.state.lock().open();
        debug!("channel {} opened", self.id);
    }

    pub(crate) fn close(&self) {
        let postings = self.state.lock().close();
        debug!(
            "channel {} closed, failing {} waiting operations",
            self.id,
            postings.completions.len()
        );
        self.dispatch(postings);
    }

    pub(crate) fn cancel(&self) {
        let postings = self.state.lock().cancel();
        debug!(
            "channel {} cancelled {} waiting operations",
            self.id,
            postings.completions.len()
        );
        self.dispatch(postings);
    }

    /// Cancels everything still waiting and unregisters the channel.
    pub(crate) fn destroy(&self) {
        self.shut_down();
        self.service.registry.lock().unregister(self.id);
        debug!("channel {} destroyed", self.id);
    }

    pub(crate) fn put(&self, value: T) -> Result<(), PutError<T>> {
        let waiter = Arc::new(Waiter::new());
        self.submit_put(PutOperation::new(value, Sink::Blocking(waiter.clone())));
        waiter.wait()
    }

    pub(crate) fn async_put(&self, value: T, sink: Sink<Result<(), PutError<T>>>) {
        self.submit_put(PutOperation::new(value, sink));
    }

    pub(crate) fn get(&self) -> Result<T, ChannelError> {
        let waiter = Arc::new(Waiter::new());
        self.submit_get(GetOperation::new(Sink::Blocking(waiter.clone())));
        waiter.wait()
    }

    pub(crate) fn async_get(&self, sink: Sink<Result<T, ChannelError>>) {
        self.submit_get(GetOperation::new(sink));
    }

    fn submit_put(&self, putter: PutOperation<T>) {
        let mut state = self.state.lock();
        let postings = state.do_put(putter);
        if postings.suspended {
            trace!(
                "channel {}: put suspended, {} putters waiting",
                self.id,
                state.waiting_putters()
            );
        }
        self.account(&postings);
        drop(state);
        self.dispatch(postings);
    }

    fn submit_get(&self, getter: GetOperation<T>) {
        let mut state = self.state.lock();
        let postings = state.do_get(getter);
        if postings.suspended {
            trace!(
                "channel {}: get suspended, {} getters waiting",
                self.id,
                state.waiting_getters()
            );
        }
        self.account(&postings);
        drop(state);
        self.dispatch(postings);
    }

    /// Must run while the channel lock is held, so that a suspended
    /// operation is counted before anyone can resolve it.
    fn account(&self, postings: &Postings) {
        for _ in 0..postings.work_started {
            self.service.scheduler.work_started();
        }
    }

    /// Must run after the channel lock is released. Handlers may call
    /// back into this channel.
    fn dispatch(&self, postings: Postings) {
        let scheduler = &self.service.scheduler;
        for posting in postings.completions {
            match posting {
                Posting::Immediate(completion) => match completion.route {
                    Route::Scheduler { is_continuation } => {
                        scheduler.post_immediate_completion(completion.op, is_continuation)
                    }
                    Route::Inline => completion.op.complete(),
                },
                Posting::Deferred(completion) => {
                    trace!("channel {}: resuming {:?}", self.id, completion.op.kind());
                    match completion.route {
                        Route::Scheduler { .. } => {
                            scheduler.post_deferred_completion(completion.op)
                        }
                        Route::Inline => completion.op.complete(),
                    }
                }
            }
        }
    }
}

impl<T, B> Registered for Shared<T, B>
where
    T: Send + 'static,
    B: Buffer<T> + 'static,
{
    fn shut_down(&self) {
        let postings = self.state.lock().abandon();
        debug!(
            "channel {} shut down, cancelling {} waiting operations",
            self.id,
            postings.completions.len()
        );
        self.dispatch(postings);
    }
}
