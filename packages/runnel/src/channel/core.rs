// minimal API for the channel state machine. the exposed API is a convenience wrapper around this.

use super::error::*;
use crate::sink::{Sink, Delivered};
use std::{
    collections::VecDeque,
    mem::take,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::oneshot;


// completion callback for a send. called with the lock released.
pub(crate) type Notify = Box<dyn FnOnce(Result<(), SendError>) + Send>;

// user-provided handler for failed pipe deliveries.
pub(crate) type ErrorHandler = Arc<dyn Fn(PipeError) + Send + Sync>;


// handle to a channel.
pub(crate) struct Channel<T>(Arc<Mutex<Lockable<T>>>);

// channel lockable state.
//
// invariants, whenever the lock is released:
//
// - buffer is sorted by seq.
// - if not paused and not piped, buffer and pulls are not both non-empty.
// - if piped, pushes is empty.
// - pushes is non-empty only if buffer is at or over capacity, or the channel is paused.
// - if closed, pushes is empty, and pulls is non-empty only if buffer is non-empty or some values
//   are in flight.
// - only buffer slots of a piped channel hold a notify.
//
// buffer may transiently exceed capacity. values that were already admitted, such as a value
// given back by a dropped receive or values staged for a pipe that was then detached, are never
// turned away. sends wait until it drains below capacity again.
pub(crate) struct Lockable<T> {
    // values admitted but not yet taken by a consumer or relayed to the pipe sink.
    buffer: VecDeque<Slot<T>>,
    // buffer maximum length for direct admission. piped values are not bounded by this.
    capacity: Option<usize>,
    // once set, never unset.
    closed: bool,
    // while set, nothing leaves the buffer.
    paused: bool,
    // receive futures waiting for a value. dropping a sender rejects that pull.
    pulls: VecDeque<oneshot::Sender<Handed<T>>>,
    // sends waiting for buffer space.
    pushes: VecDeque<Slot<T>>,
    // current pipe, if any.
    pipe: Option<PipeLink<T>>,
    // whether some caller has claimed the job of relaying the buffer to the pipe sink.
    relaying: bool,
    // seq to give the next value sent.
    next_seq: u64,
    // values handed to receive futures which have neither observed nor given them back.
    in_flight: usize,
    // send completions to run once the lock is released.
    settled: Vec<(Notify, Result<(), SendError>)>,
}

// a value in the channel, tagged with its position in send order.
struct Slot<T> {
    seq: u64,
    value: T,
    // completion for the send, if not yet reported.
    notify: Option<Notify>,
}

// a value handed to a receive future, tagged so it can be given back in order.
pub(crate) struct Handed<T> {
    pub(crate) seq: u64,
    pub(crate) value: T,
}

// outcome of a receive.
pub(crate) enum Pull<T> {
    // a value was available right away.
    Ready(Handed<T>),
    // a pending pull was registered.
    Waiting(oneshot::Receiver<Handed<T>>),
}

// link from a channel to the sink it forwards into.
struct PipeLink<T> {
    sink: Arc<dyn Sink<T>>,
    on_error: Option<ErrorHandler>,
}

// a value taken from the buffer for delivery to the pipe sink.
struct Outbound<T> {
    sink: Arc<dyn Sink<T>>,
    value: T,
    done: Delivered,
}

impl<T> PipeLink<T> {
    // prepare a value for delivery to the sink.
    //
    // if delivery fails, the error goes to the error handler if there is one, otherwise to the
    // send that produced the value, otherwise to the log.
    fn outbound(&self, value: T, notify: Option<Notify>) -> Outbound<T> {
        let on_error = self.on_error.clone();
        let done: Delivered = Box::new(move |result| {
            let result = match (result, on_error) {
                (Err(e), Some(on_error)) => {
                    on_error(e);
                    Ok(())
                }
                (result, _) => result.map_err(SendError::from),
            };
            match (notify, result) {
                (Some(notify), result) => notify(result),
                (None, Err(e)) => warn!(error = %e, "pipe delivery failed with no error handler"),
                (None, Ok(())) => (),
            }
        });
        Outbound { sink: Arc::clone(&self.sink), value, done }
    }
}

impl<T> Channel<T> {
    // construct empty channel.
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Channel(Arc::new(Mutex::new(Lockable {
            buffer: VecDeque::new(),
            capacity,
            closed: false,
            paused: false,
            pulls: VecDeque::new(),
            pushes: VecDeque::new(),
            pipe: None,
            relaying: false,
            next_seq: 0,
            in_flight: 0,
            settled: Vec::new(),
        })))
    }

    // clone another handle to the channel.
    pub(crate) fn clone(&self) -> Self {
        Channel(Arc::clone(&self.0))
    }

    // whether both handles are to the same channel.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    // lock the channel. every mutation completes before the lock is released, so a poisoned lock
    // still guards consistent state.
    fn lock(&self) -> MutexGuard<'_, Lockable<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // read the channel state.
    pub(crate) fn peek<R>(&self, f: impl FnOnce(&Lockable<T>) -> R) -> R {
        f(&self.lock())
    }

    // run an operation on the locked channel, move values along as far as the resulting state
    // allows, then run completions and pipe deliveries with the lock released.
    pub(crate) fn transact<R>(&self, f: impl FnOnce(&mut Lockable<T>) -> R) -> R {
        let (out, settled, relay) = {
            let mut lock = self.lock();
            let out = f(&mut lock);
            lock.pump();
            let relay = !lock.relaying && lock.can_relay();
            if relay {
                lock.relaying = true;
            }
            (out, take(&mut lock.settled), relay)
        };
        for (notify, result) in settled {
            notify(result);
        }
        if relay {
            self.relay();
        }
        out
    }

    // deliver buffered values to the pipe sink, one at a time, until there are none left to
    // deliver or the channel is paused or unpiped.
    //
    // only one caller relays at a time, so deliveries happen in order. the lock is not held while
    // a sink runs, so a sink may use this channel.
    fn relay(&self) {
        loop {
            let next = {
                let mut lock = self.lock();
                match lock.next_outbound() {
                    Some(next) => next,
                    None => {
                        lock.relaying = false;
                        lock.reject_if_exhausted();
                        return;
                    }
                }
            };
            trace!("relaying value to pipe sink");
            next.sink.accept(next.value, next.done);
        }
    }
}

impl<T> Lockable<T> {
    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn is_piped(&self) -> bool {
        self.pipe.is_some()
    }

    // whether a value may be buffered without exceeding capacity.
    fn has_room(&self) -> bool {
        self.capacity.is_none_or(|n| self.buffer.len() < n)
    }

    // whether no value will ever be deliverable again.
    fn is_exhausted(&self) -> bool {
        self.closed && self.buffer.is_empty() && self.in_flight == 0
    }

    fn can_relay(&self) -> bool {
        self.pipe.is_some() && !self.paused && !self.buffer.is_empty()
    }

    // tag a value with the next seq.
    fn slot(&mut self, value: T, notify: Option<Notify>) -> Slot<T> {
        let seq = self.next_seq;
        self.next_seq += 1;
        Slot { seq, value, notify }
    }

    // queue a completion to run once the lock is released.
    fn settle(&mut self, notify: Option<Notify>, result: Result<(), SendError>) {
        if let Some(notify) = notify {
            self.settled.push((notify, result));
        }
    }

    // hand a value to the oldest pull that is still listening, or give it back if there is none.
    fn hand_to_pull(&mut self, seq: u64, mut value: T) -> Result<(), T> {
        while let Some(pull) = self.pulls.pop_front() {
            match pull.send(Handed { seq, value }) {
                Ok(()) => {
                    trace!("value handed to pending pull");
                    self.in_flight += 1;
                    return Ok(());
                }
                // that pull's future was dropped
                Err(returned) => value = returned.value,
            }
        }
        Err(value)
    }

    // admit a value if that can be done without waiting, otherwise give it back.
    //
    // assumes the channel is not closed.
    fn try_admit(&mut self, mut slot: Slot<T>) -> Result<(), Slot<T>> {
        if self.pipe.is_some() {
            if self.paused {
                // staged until resume, regardless of capacity
                let notify = slot.notify.take();
                self.settle(notify, Ok(()));
            }
            // otherwise the send completes once the sink has taken it
            self.buffer.push_back(slot);
            return Ok(());
        }

        if !self.paused {
            match self.hand_to_pull(slot.seq, slot.value) {
                Ok(()) => {
                    self.settle(slot.notify, Ok(()));
                    return Ok(());
                }
                Err(value) => slot.value = value,
            }
        }

        if self.pushes.is_empty() && self.has_room() {
            let notify = slot.notify.take();
            self.buffer.push_back(slot);
            trace!(len = self.buffer.len(), "value buffered");
            self.settle(notify, Ok(()));
            Ok(())
        } else {
            Err(slot)
        }
    }

    // send a value, queueing it if the channel is full.
    pub(crate) fn send(&mut self, value: T, notify: Notify) {
        if self.closed {
            self.settle(Some(notify), Err(ClosedError.into()));
            return;
        }
        let slot = self.slot(value, Some(notify));
        if let Err(slot) = self.try_admit(slot) {
            self.pushes.push_back(slot);
            trace!(waiting = self.pushes.len(), "channel full, send is waiting");
        }
    }

    // send a value only if that can be done without waiting.
    pub(crate) fn try_send(&mut self, value: T) -> Result<(), TrySendError<T>> {
        if self.closed {
            return Err(TrySendError { value, cause: ClosedError.into() });
        }
        let slot = self.slot(value, None);
        self.try_admit(slot)
            .map_err(|slot| TrySendError { value: slot.value, cause: FullError.into() })
    }

    // take the next value if one is deliverable to a receiver right away.
    fn take_next(&mut self) -> Option<Handed<T>> {
        if self.paused || self.pipe.is_some() {
            return None;
        }
        if let Some(Slot { seq, value, .. }) = self.buffer.pop_front() {
            return Some(Handed { seq, value });
        }
        // rendezvous with a waiting send
        let Slot { seq, value, notify } = self.pushes.pop_front()?;
        self.settle(notify, Ok(()));
        Some(Handed { seq, value })
    }

    // take a value if one is deliverable right away, otherwise register a pending pull.
    //
    // the value is in flight until the receive future observes or restores it.
    pub(crate) fn recv(&mut self) -> Result<Pull<T>, ExhaustedError> {
        if let Some(handed) = self.take_next() {
            self.in_flight += 1;
            return Ok(Pull::Ready(handed));
        }
        if self.is_exhausted() {
            return Err(ExhaustedError);
        }
        let (send, recv) = oneshot::channel();
        self.pulls.push_back(send);
        trace!(waiting = self.pulls.len(), "no value deliverable, receive is waiting");
        Ok(Pull::Waiting(recv))
    }

    // take a value if one is deliverable right away.
    pub(crate) fn try_recv(&mut self) -> Option<T> {
        self.take_next().map(|handed| handed.value)
    }

    // record that a receive future returned its value to the caller.
    pub(crate) fn observe(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    // give back a value which was handed to a receive future that was then dropped without
    // observing it. it goes back in send order, ahead of every later value.
    pub(crate) fn restore(&mut self, handed: Handed<T>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Handed { seq, value } = handed;
        let at = self.buffer.partition_point(|slot| slot.seq < seq);
        self.buffer.insert(at, Slot { seq, value, notify: None });
    }

    // close the channel. buffered values stay receivable. waiting sends are rejected and their
    // values dropped.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let pushes = take(&mut self.pushes);
        debug!(buffered = self.buffer.len(), released = pushes.len(), "channel closed");
        for slot in pushes {
            self.settle(slot.notify, Err(ClosedError.into()));
        }
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            debug!(paused, buffered = self.buffer.len(), "channel flow control changed");
        }
        self.paused = paused;
    }

    // attach a pipe, replacing any current one. the buffer is relayed into it after the lock is
    // released.
    pub(crate) fn pipe(&mut self, sink: Arc<dyn Sink<T>>, on_error: Option<ErrorHandler>) {
        debug!(
            flushing = self.buffer.len() + self.pushes.len(),
            replacing = self.pipe.is_some(),
            "channel piped"
        );
        self.pipe = Some(PipeLink { sink, on_error });
    }

    // detach the pipe, returning whether there was one.
    //
    // values not yet relayed stay buffered, and their sends complete.
    pub(crate) fn unpipe(&mut self) -> bool {
        if self.pipe.take().is_none() {
            return false;
        }
        let notifies = self.buffer.iter_mut()
            .filter_map(|slot| slot.notify.take())
            .collect::<Vec<_>>();
        debug!(buffered = self.buffer.len(), "channel unpiped");
        for notify in notifies {
            self.settle(Some(notify), Ok(()));
        }
        true
    }

    // take the next value to relay to the pipe sink, if the gate allows it.
    fn next_outbound(&mut self) -> Option<Outbound<T>> {
        if self.paused {
            return None;
        }
        let link = self.pipe.as_ref()?;
        let slot = self.buffer.pop_front()?;
        Some(link.outbound(slot.value, slot.notify))
    }

    // move values along as far as the current state allows.
    fn pump(&mut self) {
        if self.pipe.is_some() {
            // piped sends never wait for space
            while let Some(mut slot) = self.pushes.pop_front() {
                if self.paused {
                    let notify = slot.notify.take();
                    self.settle(notify, Ok(()));
                }
                self.buffer.push_back(slot);
            }
        } else if !self.paused {
            self.serve_pulls();
        }
        self.reject_if_exhausted();
    }

    // nothing left and never will be. dropping the senders rejects the pulls.
    fn reject_if_exhausted(&mut self) {
        if self.is_exhausted() && !self.pulls.is_empty() {
            trace!(rejected = self.pulls.len(), "rejecting pending pulls on exhausted channel");
            self.pulls.clear();
        }
    }

    // admit waiting sends and satisfy waiting pulls until one side runs out.
    fn serve_pulls(&mut self) {
        loop {
            while self.has_room() {
                let Some(mut slot) = self.pushes.pop_front() else { break };
                let notify = slot.notify.take();
                self.buffer.push_back(slot);
                self.settle(notify, Ok(()));
            }

            if self.pulls.is_empty() {
                return;
            }

            if let Some(slot) = self.buffer.pop_front() {
                if let Err(value) = self.hand_to_pull(slot.seq, slot.value) {
                    self.buffer.push_front(Slot { value, ..slot });
                    return;
                }
            } else if let Some(slot) = self.pushes.pop_front() {
                // rendezvous
                match self.hand_to_pull(slot.seq, slot.value) {
                    Ok(()) => self.settle(slot.notify, Ok(())),
                    Err(value) => {
                        self.pushes.push_front(Slot { value, ..slot });
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // notify that records its result into a shared log.
    fn recording(log: &Arc<StdMutex<Vec<Result<(), String>>>>) -> Notify {
        let log = Arc::clone(log);
        Box::new(move |result| log.lock().unwrap().push(result.map_err(|e| e.to_string())))
    }

    #[test]
    fn pending_pull_is_satisfied_before_buffering() {
        let channel = Channel::<u32>::new(Some(1));
        let Ok(Pull::Waiting(mut pull)) = channel.transact(|lock| lock.recv())
            else { panic!("expected waiting pull") };

        channel.transact(|lock| lock.try_send(7)).unwrap();

        assert_eq!(pull.try_recv().unwrap().value, 7);
        assert_eq!(channel.peek(|lock| lock.len()), 0);
    }

    #[test]
    fn dropped_pull_is_skipped() {
        let channel = Channel::<u32>::new(None);
        let first = channel.transact(|lock| lock.recv());
        let Ok(Pull::Waiting(mut second)) = channel.transact(|lock| lock.recv())
            else { panic!("expected waiting pull") };
        drop(first);

        channel.transact(|lock| lock.try_send(1)).unwrap();

        assert_eq!(second.try_recv().unwrap().value, 1);
    }

    #[test]
    fn completions_run_after_unlock() {
        let channel = Channel::<u32>::new(Some(0));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let channel_2 = channel.clone();
        let log_2 = Arc::clone(&log);
        // a completion that re-enters the channel would deadlock if run under the lock
        let notify: Notify = Box::new(move |result| {
            let len = channel_2.peek(|lock| lock.len());
            log_2.lock().unwrap().push(result.map(|()| assert_eq!(len, 0)).map_err(|e| e.to_string()));
        });
        channel.transact(|lock| lock.send(5, notify));
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(channel.transact(|lock| lock.try_recv()), Some(5));
        assert_eq!(*log.lock().unwrap(), vec![Ok(())]);
    }

    #[test]
    fn close_releases_waiting_sends_and_keeps_buffer() {
        let channel = Channel::<u32>::new(Some(1));
        let log = Arc::new(StdMutex::new(Vec::new()));
        channel.transact(|lock| lock.send(1, recording(&log)));
        channel.transact(|lock| lock.send(2, recording(&log)));
        channel.transact(|lock| lock.send(3, recording(&log)));
        channel.transact(|lock| lock.close());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Ok(()),
                Err("channel is closed".to_owned()),
                Err("channel is closed".to_owned()),
            ],
        );
        assert_eq!(channel.transact(|lock| lock.try_recv()), Some(1));
        assert!(matches!(channel.transact(|lock| lock.recv()), Err(ExhaustedError)));
    }

    #[test]
    fn paused_channel_keeps_pulls_waiting() {
        let channel = Channel::<u32>::new(None);
        channel.transact(|lock| lock.set_paused(true));
        let Ok(Pull::Waiting(mut pull)) = channel.transact(|lock| lock.recv())
            else { panic!("expected waiting pull") };
        channel.transact(|lock| lock.try_send(9)).unwrap();
        channel.transact(|lock| lock.close());
        assert!(pull.try_recv().is_err());
        assert_eq!(channel.peek(|lock| lock.len()), 1);

        channel.transact(|lock| lock.set_paused(false));
        assert_eq!(pull.try_recv().unwrap().value, 9);
    }
}
