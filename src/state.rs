//! Per-channel state and the put/get matching protocol.
//!
//! Nothing here talks to the scheduler directly. Each operation
//! returns [Postings]: the completions it decided on, in the order
//! they must be delivered, and how many requests it suspended.

use crate::error::ChannelError;
use crate::op::Completion;
use crate::op::GetOperation;
use crate::op::PutOperation;
use std::collections::VecDeque;

/// Storage for values that were put but not yet taken.
pub(crate) trait Buffer<T>: Send {
    fn len(&self) -> usize;
    fn push_back(&mut self, value: T);
    fn pop_front(&mut self) -> Option<T>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Buffer<T> for VecDeque<T> {
    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn push_back(&mut self, value: T) {
        VecDeque::push_back(self, value)
    }

    fn pop_front(&mut self) -> Option<T> {
        VecDeque::pop_front(self)
    }
}

/// A payload-less buffer: only the number of signals is stored.
#[derive(Debug, Default)]
pub(crate) struct SignalBuffer {
    buffered: usize,
}

impl Buffer<()> for SignalBuffer {
    fn len(&self) -> usize {
        self.buffered
    }

    fn push_back(&mut self, (): ()) {
        self.buffered += 1;
    }

    fn pop_front(&mut self) -> Option<()> {
        if self.buffered == 0 {
            return None;
        }
        self.buffered -= 1;
        Some(())
    }
}

/// Which queue a completion was routed through.
#[derive(Debug)]
pub(crate) enum Posting {
    /// Resolved by the request that created it.
    Immediate(Completion),
    /// Resolved after having been suspended.
    Deferred(Completion),
}

/// The outcome of one protocol step.
#[derive(Debug, Default)]
#[must_use = "postings must be dispatched or their operations never complete"]
pub(crate) struct Postings {
    pub(crate) completions: Vec<Posting>,
    /// Number of asynchronous requests parked by this step. Each one
    /// is one unit of outstanding scheduler work.
    pub(crate) work_started: usize,
    /// Whether the request was parked, asynchronous or not.
    pub(crate) suspended: bool,
}

impl Postings {
    fn immediate(&mut self, completion: Completion) {
        self.completions.push(Posting::Immediate(completion));
    }

    fn deferred(&mut self, completion: Completion) {
        self.completions.push(Posting::Deferred(completion));
    }

    fn suspend(&mut self, is_async: bool) {
        self.suspended = true;
        if is_async {
            self.work_started += 1;
        }
    }
}

#[derive(Debug)]
pub(crate) struct ChannelState<T, B> {
    open: bool,
    capacity: usize,
    buffer: B,
    putters: VecDeque<PutOperation<T>>,
    getters: VecDeque<GetOperation<T>>,
}

impl<T: Send + 'static, B: Buffer<T>> ChannelState<T, B> {
    pub(crate) fn new(capacity: usize, buffer: B) -> Self {
        debug_assert!(buffer.is_empty());
        ChannelState {
            open: true,
            capacity,
            buffer,
            putters: VecDeque::new(),
            getters: VecDeque::new(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn waiting_putters(&self) -> usize {
        self.putters.iter().filter(|p| !p.is_withdrawn()).count()
    }

    pub(crate) fn waiting_getters(&self) -> usize {
        self.getters.iter().filter(|g| !g.is_withdrawn()).count()
    }

    /// Whether a get would complete without suspending.
    pub(crate) fn ready(&self) -> bool {
        !self.buffer.is_empty() || self.putters.iter().any(|p| !p.is_withdrawn())
    }

    /// Reopens the channel. Buffered values and queues are untouched.
    pub(crate) fn open(&mut self) {
        self.open = true;
    }

    /// Refuses further puts and fails every waiting request.
    /// Buffered values stay available to getters.
    pub(crate) fn close(&mut self) -> Postings {
        self.open = false;
        let postings = self.fail_waiting(ChannelError::BrokenChannel);
        self.check_invariants();
        postings
    }

    /// Fails every waiting request without changing whether the
    /// channel is open.
    pub(crate) fn cancel(&mut self) -> Postings {
        let postings = self.fail_waiting(ChannelError::CancelledOperation);
        self.check_invariants();
        postings
    }

    /// Closes the channel and cancels every waiting request. Used
    /// when the channel is destroyed or its service shuts down.
    pub(crate) fn abandon(&mut self) -> Postings {
        self.open = false;
        self.fail_waiting(ChannelError::CancelledOperation)
    }

    fn fail_waiting(&mut self, cause: ChannelError) -> Postings {
        // Waiting getters imply an empty buffer and no putters, so at
        // most one of these queues is non-empty.
        debug_assert!(self.putters.is_empty() || self.getters.is_empty());
        let mut postings = Postings::default();
        for putter in self.putters.drain(..) {
            postings.deferred(putter.fail(cause));
        }
        for getter in self.getters.drain(..) {
            postings.deferred(getter.fail(cause));
        }
        postings
    }

    /// Pops the oldest getter whose caller is still listening.
    /// Withdrawn getters are cancelled on the way, so each still
    /// completes exactly once.
    fn next_getter(&mut self, postings: &mut Postings) -> Option<GetOperation<T>> {
        while let Some(getter) = self.getters.pop_front() {
            if !getter.is_withdrawn() {
                return Some(getter);
            }
            postings.deferred(getter.fail(ChannelError::CancelledOperation));
        }
        None
    }

    /// Pops the oldest putter whose caller is still listening. A
    /// withdrawn put takes its value with it.
    fn next_putter(&mut self, postings: &mut Postings) -> Option<PutOperation<T>> {
        while let Some(putter) = self.putters.pop_front() {
            if !putter.is_withdrawn() {
                return Some(putter);
            }
            postings.deferred(putter.fail(ChannelError::CancelledOperation));
        }
        None
    }

    pub(crate) fn do_put(&mut self, putter: PutOperation<T>) -> Postings {
        let mut postings = Postings::default();
        if !self.open {
            postings.immediate(putter.fail(ChannelError::BrokenChannel));
        } else if let Some(getter) = self.next_getter(&mut postings) {
            // A waiting getter takes the value directly.
            let (value, putter) = putter.hand_off();
            postings.deferred(getter.deliver(value));
            postings.immediate(putter);
        } else if self.buffer.len() < self.capacity {
            let (value, putter) = putter.hand_off();
            self.buffer.push_back(value);
            postings.immediate(putter);
        } else {
            postings.suspend(putter.is_async());
            self.putters.push_back(putter);
        }
        self.check_invariants();
        postings
    }

    pub(crate) fn do_get(&mut self, getter: GetOperation<T>) -> Postings {
        let mut postings = Postings::default();
        if let Some(value) = self.buffer.pop_front() {
            let getter = getter.deliver(value);
            // The freed slot goes to the oldest parked putter.
            if let Some(putter) = self.next_putter(&mut postings) {
                let (value, putter) = putter.hand_off();
                self.buffer.push_back(value);
                postings.deferred(putter);
            }
            postings.immediate(getter);
        } else if let Some(putter) = self.next_putter(&mut postings) {
            // Only reachable with zero capacity.
            let (value, putter) = putter.hand_off();
            postings.deferred(putter);
            postings.immediate(getter.deliver(value));
        } else if self.open {
            postings.suspend(getter.is_async());
            self.getters.push_back(getter);
        } else {
            postings.immediate(getter.fail(ChannelError::BrokenChannel));
        }
        self.check_invariants();
        postings
    }

    fn check_invariants(&self) {
        debug_assert!(self.buffer.len() <= self.capacity);
        debug_assert!(
            self.getters.is_empty() || (self.buffer.is_empty() && self.putters.is_empty()),
            "getter waiting while values are available"
        );
        debug_assert!(
            self.putters.is_empty() || self.buffer.len() == self.capacity,
            "putter waiting while buffer has room"
        );
        debug_assert!(
            self.open || (self.putters.is_empty() && self.getters.is_empty()),
            "closed channel has waiting requests"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PutError;
    use crate::op::OpKind;
    use crate::op::Sink;
    use futures::channel::oneshot;
    use std::sync::Arc;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn put(log: &Log, value: u32) -> PutOperation<u32> {
        let log = log.clone();
        PutOperation::new(
            value,
            Sink::handler(move |r: Result<(), PutError<u32>>| {
                log.lock().unwrap().push(match r {
                    Ok(()) => format!("put {value} ok"),
                    Err(e) => format!("put {} {:?}", e.value, e.cause),
                });
            }),
        )
    }

    fn get(log: &Log, name: &'static str) -> GetOperation<u32> {
        let log = log.clone();
        GetOperation::new(Sink::handler(move |r: Result<u32, ChannelError>| {
            log.lock().unwrap().push(match r {
                Ok(v) => format!("{name} got {v}"),
                Err(e) => format!("{name} {e:?}"),
            });
        }))
    }

    /// Runs completions in posting order, labelling how each was
    /// routed.
    fn run(postings: Postings) -> Vec<(&'static str, OpKind)> {
        postings
            .completions
            .into_iter()
            .map(|posting| {
                let (label, completion) = match posting {
                    Posting::Immediate(c) => ("immediate", c),
                    Posting::Deferred(c) => ("deferred", c),
                };
                let kind = completion.op.kind();
                completion.op.complete();
                (label, kind)
            })
            .collect()
    }

    fn taken(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn put_buffers_until_full_then_suspends() {
        let log = Log::default();
        let mut state = ChannelState::new(2, VecDeque::new());

        assert_eq!(vec![("immediate", OpKind::Put)], run(state.do_put(put(&log, 1))));
        assert_eq!(vec![("immediate", OpKind::Put)], run(state.do_put(put(&log, 2))));
        let postings = state.do_put(put(&log, 3));
        assert!(postings.suspended);
        assert_eq!(1, postings.work_started);
        assert!(run(postings).is_empty());

        assert_eq!(2, state.len());
        assert_eq!(1, state.waiting_putters());
        assert_eq!(vec!["put 1 ok", "put 2 ok"], taken(&log));
    }

    #[test]
    fn get_slides_parked_putter_into_buffer() {
        let log = Log::default();
        let mut state = ChannelState::new(1, VecDeque::new());
        run(state.do_put(put(&log, 1)));
        run(state.do_put(put(&log, 2)));
        taken(&log);

        assert_eq!(
            vec![("deferred", OpKind::Put), ("immediate", OpKind::Get)],
            run(state.do_get(get(&log, "a")))
        );
        assert_eq!(vec!["put 2 ok", "a got 1"], taken(&log));
        assert_eq!(1, state.len());
        assert_eq!(0, state.waiting_putters());
    }

    #[test]
    fn put_hands_off_to_waiting_getter() {
        let log = Log::default();
        let mut state = ChannelState::new(4, VecDeque::new());
        let postings = state.do_get(get(&log, "a"));
        assert_eq!(1, postings.work_started);
        assert!(run(postings).is_empty());
        assert!(!state.ready());

        assert_eq!(
            vec![("deferred", OpKind::Get), ("immediate", OpKind::Put)],
            run(state.do_put(put(&log, 9)))
        );
        assert_eq!(vec!["a got 9", "put 9 ok"], taken(&log));
        assert_eq!(0, state.len());
    }

    #[test]
    fn zero_capacity_get_takes_from_parked_putter() {
        let log = Log::default();
        let mut state = ChannelState::new(0, VecDeque::new());
        run(state.do_put(put(&log, 5)));
        assert!(state.ready());
        assert_eq!(
            vec![("deferred", OpKind::Put), ("immediate", OpKind::Get)],
            run(state.do_get(get(&log, "a")))
        );
        assert_eq!(vec!["put 5 ok", "a got 5"], taken(&log));
        assert!(!state.ready());
    }

    #[test]
    fn close_fails_putters_and_keeps_buffer() {
        let log = Log::default();
        let mut state = ChannelState::new(1, VecDeque::new());
        run(state.do_put(put(&log, 1)));
        run(state.do_put(put(&log, 2)));
        taken(&log);

        assert_eq!(vec![("deferred", OpKind::Put)], run(state.close()));
        assert_eq!(vec!["put 2 BrokenChannel"], taken(&log));
        assert!(!state.is_open());

        run(state.do_put(put(&log, 3)));
        run(state.do_get(get(&log, "a")));
        run(state.do_get(get(&log, "b")));
        assert_eq!(
            vec!["put 3 BrokenChannel", "a got 1", "b BrokenChannel"],
            taken(&log)
        );
    }

    #[test]
    fn cancel_keeps_channel_open() {
        let log = Log::default();
        let mut state = ChannelState::new(0, VecDeque::new());
        run(state.do_get(get(&log, "a")));
        run(state.do_get(get(&log, "b")));

        assert_eq!(2, run(state.cancel()).len());
        assert_eq!(vec!["a CancelledOperation", "b CancelledOperation"], taken(&log));
        assert!(state.is_open());
        assert_eq!(0, state.waiting_getters());
    }

    #[test]
    fn abandon_closes_and_cancels() {
        let log = Log::default();
        let mut state = ChannelState::new(0, VecDeque::new());
        run(state.do_put(put(&log, 1)));
        run(state.abandon());
        assert!(!state.is_open());
        assert_eq!(vec!["put 1 CancelledOperation"], taken(&log));
    }

    #[test]
    fn put_skips_withdrawn_getter() {
        let log = Log::default();
        let mut state = ChannelState::new(1, VecDeque::new());
        let (tx, rx) = oneshot::channel();
        let postings = state.do_get(GetOperation::new(Sink::Future(tx)));
        assert_eq!(1, postings.work_started);
        assert!(run(postings).is_empty());
        drop(rx);
        assert_eq!(0, state.waiting_getters());

        // The withdrawn getter is cancelled and the value is buffered.
        assert_eq!(
            vec![("deferred", OpKind::Get), ("immediate", OpKind::Put)],
            run(state.do_put(put(&log, 5)))
        );
        assert_eq!(vec!["put 5 ok"], taken(&log));
        assert_eq!(1, state.len());

        run(state.do_get(get(&log, "a")));
        assert_eq!(vec!["a got 5"], taken(&log));
    }

    #[test]
    fn get_skips_withdrawn_putter() {
        let log = Log::default();
        let mut state = ChannelState::new(0, VecDeque::new());
        let (tx, rx) = oneshot::channel();
        run(state.do_put(PutOperation::new(1, Sink::Future(tx))));
        run(state.do_put(put(&log, 2)));
        drop(rx);
        assert_eq!(1, state.waiting_putters());
        assert!(state.ready());

        assert_eq!(
            vec![
                ("deferred", OpKind::Put),
                ("deferred", OpKind::Put),
                ("immediate", OpKind::Get)
            ],
            run(state.do_get(get(&log, "a")))
        );
        assert_eq!(vec!["put 2 ok", "a got 2"], taken(&log));
        assert!(!state.ready());
    }

    #[test]
    fn signal_buffer_counts() {
        let mut buffer = SignalBuffer::default();
        assert_eq!(None, buffer.pop_front());
        buffer.push_back(());
        buffer.push_back(());
        assert_eq!(2, Buffer::len(&buffer));
        assert_eq!(Some(()), buffer.pop_front());
        assert_eq!(Some(()), buffer.pop_front());
        assert!(Buffer::is_empty(&buffer));
    }
}
