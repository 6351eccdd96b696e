// exposed API of channels

use self::future::*;
use super::{
    error::*,
    core,
    stream::RecvStream,
};
use crate::sink::{Sink, Delivered};
use std::{
    fmt::{self, Formatter, Debug},
    future::Future,
    sync::Arc,
};
use tokio::sync::oneshot;


// ==== helper functions for adapting core API to exposed API ====


// create a send completion and the future it resolves.
fn send_fut() -> (core::Notify, SendFut) {
    let (send, recv) = oneshot::channel();
    let notify: core::Notify = Box::new(move |result| {
        if let Err(Err(SendError::Pipe(e))) = send.send(result) {
            // the sender stopped waiting, so nobody else will see this
            warn!(error = %e, "pipe delivery failed with no error handler");
        }
    });
    (notify, SendFut::new(recv))
}


// ==== the exposed API ====


/// Channel for handing values between tasks, with optional bounding
///
/// A `Channel` is a handle: cloning it creates another handle to the same channel. Values are
/// delivered in the order they were sent, each to exactly one receiver.
///
/// - **Bounding:** A bounded channel buffers at most its capacity. Sending into a full bounded
///   channel waits until a receiver frees a slot. A capacity of 0 makes a rendezvous channel,
///   where every send waits for a receive.
/// - **Closing:** Closing is permanent. Values already buffered can still be received, after
///   which receiving fails with [`ExhaustedError`]. Sends still waiting for space fail with
///   [`ClosedError`] and their values are dropped.
/// - **Piping:** While piped, the channel forwards every value into a [`Sink`] instead of
///   buffering it. Attaching a pipe first flushes whatever is buffered into the sink.
/// - **Pausing:** While paused, values are still admitted, but nothing leaves the channel, neither
///   to the pipe sink nor to receivers. Resuming delivers everything held back, in order.
///
/// Sends and receives take effect when they are called. The returned futures only report their
/// outcome, so a send whose future is dropped while waiting for space is still delivered.
pub struct Channel<T>(core::Channel<T>);

impl<T> Channel<T> {
    /// Create a channel that never runs out of space
    pub fn unbounded() -> Self {
        Channel(core::Channel::new(None))
    }

    /// Create a channel that buffers at most `capacity` values
    pub fn bounded(capacity: usize) -> Self {
        Channel(core::Channel::new(Some(capacity)))
    }

    /// Create a channel from an optional capacity that may be out of range
    ///
    /// `None` creates an unbounded channel. Negative capacities are rejected.
    pub fn with_capacity(capacity: Option<i64>) -> Result<Self, InvalidCapacityError> {
        match capacity {
            None => Ok(Self::unbounded()),
            Some(n) => usize::try_from(n)
                .map(Self::bounded)
                .map_err(|_| InvalidCapacityError(n)),
        }
    }

    /// Send a value into this channel
    ///
    /// The value is admitted right away if a receiver is waiting, the channel is piped, or there
    /// is buffer space. Otherwise it queues behind earlier waiting sends until space frees up.
    /// The returned future resolves once the value has been admitted.
    ///
    /// If the channel is piped, the future resolves once the sink has taken the value. If
    /// forwarding fails and no pipe error handler is set, the future resolves to the pipe error.
    pub fn send(&self, value: T) -> SendFut {
        let (notify, fut) = send_fut();
        self.0.transact(|lock| lock.send(value, notify));
        fut
    }

    /// Send a value into this channel only if that can be done without waiting
    ///
    /// On error, the value is handed back.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.0.transact(|lock| lock.try_send(value))
    }

    /// Wait for a fallible future, then send its value
    ///
    /// If the future fails, its error is returned and nothing is sent.
    pub async fn send_async<F, E>(&self, value: F) -> Result<(), SendAsyncError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let value = value.await.map_err(SendAsyncError::Input)?;
        self.send(value).await?;
        Ok(())
    }

    /// Receive a value from this channel
    ///
    /// Takes the oldest buffered value if there is one. Otherwise, the returned future waits for
    /// the next value sent, behind any receives already waiting. Resolves to [`ExhaustedError`]
    /// once the channel is closed and empty.
    pub fn recv(&self) -> RecvFut<T> {
        let pull = self.0.transact(|lock| lock.recv());
        RecvFut::new(self.0.clone(), pull)
    }

    /// Receive a value only if one is available right away
    ///
    /// Returns `None` if there is nothing to take, including if the channel is closed and
    /// exhausted, paused, or piped.
    pub fn try_recv(&self) -> Option<T> {
        self.0.transact(|lock| lock.try_recv())
    }

    /// Close this channel
    ///
    /// Has no effect if already closed.
    pub fn close(&self) {
        self.0.transact(|lock| lock.close());
    }

    /// Stop values from leaving this channel until [`resume`](Self::resume) is called
    pub fn pause(&self) {
        self.0.transact(|lock| lock.set_paused(true));
    }

    /// Deliver everything held back by [`pause`](Self::pause), in order, and stop holding back
    pub fn resume(&self) {
        self.0.transact(|lock| lock.set_paused(false));
    }

    /// Stop forwarding into the current pipe sink, if any
    ///
    /// Values sent after this are buffered for receivers again.
    pub fn unpipe(&self) {
        self.0.transact(|lock| lock.unpipe());
    }

    /// Create a stream of values received from this channel
    ///
    /// Each stream is a separate consumer competing for the same values, see [`RecvStream`].
    pub fn stream(&self) -> RecvStream<T> {
        RecvStream::new(self.clone())
    }

    /// Number of buffered values
    pub fn len(&self) -> usize {
        self.0.peek(|lock| lock.len())
    }

    /// Whether no values are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered values, or `None` if unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.0.peek(|lock| lock.capacity())
    }

    /// Whether this channel has been closed
    pub fn is_closed(&self) -> bool {
        self.0.peek(|lock| lock.is_closed())
    }

    /// Whether this channel is paused
    pub fn is_paused(&self) -> bool {
        self.0.peek(|lock| lock.is_paused())
    }

    /// Whether this channel is piped into a sink
    pub fn is_piped(&self) -> bool {
        self.0.peek(|lock| lock.is_piped())
    }

    /// Whether both handles are to the same channel
    pub fn same_channel(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Forward every value from this channel into `sink`
    ///
    /// Replaces any current pipe. Buffered values, followed by sends waiting for space, are
    /// delivered to the sink before this returns (unless paused), and before any value sent
    /// later.
    ///
    /// When the sink rejects a value, the error goes to the `on_pipe_error` handler if one is set.
    /// Otherwise, it goes to the send call's future, or is logged if nobody is waiting on it.
    pub fn pipe<S>(&self, sink: S, options: PipeOptions)
    where
        S: Sink<T> + 'static,
    {
        let sink: Arc<dyn Sink<T>> = Arc::new(sink);
        self.0.transact(|lock| lock.pipe(sink, options.on_pipe_error));
    }
}

impl<T: Send + 'static> Sink<T> for Channel<T> {
    fn accept(&self, value: T, done: Delivered) {
        let notify: core::Notify = Box::new(move |result| done(result.map_err(PipeError::from)));
        self.0.transact(|lock| lock.send(value, notify));
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel(self.0.clone())
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> Debug for Channel<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.0.peek(|lock| f.debug_struct("Channel")
            .field("len", &lock.len())
            .field("capacity", &lock.capacity())
            .field("closed", &lock.is_closed())
            .field("paused", &lock.is_paused())
            .field("piped", &lock.is_piped())
            .finish())
    }
}


/// Options for [`Channel::pipe`]
#[derive(Clone, Default)]
pub struct PipeOptions {
    on_pipe_error: Option<core::ErrorHandler>,
}

impl PipeOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a handler to call with the error whenever forwarding a value into the sink fails
    ///
    /// Once a handler is set, the sends whose values failed to forward succeed anyway. The
    /// handler is never called while the channel is locked, so it may use the channel.
    pub fn set_on_pipe_error<F>(&mut self, on_pipe_error: F) -> &mut Self
    where
        F: Fn(PipeError) + Send + Sync + 'static,
    {
        self.on_pipe_error = Some(Arc::new(on_pipe_error));
        self
    }

    /// Ownership-chaining version of [`set_on_pipe_error`](Self::set_on_pipe_error)
    pub fn with_on_pipe_error<F>(mut self, on_pipe_error: F) -> Self
    where
        F: Fn(PipeError) + Send + Sync + 'static,
    {
        self.set_on_pipe_error(on_pipe_error);
        self
    }
}

impl Debug for PipeOptions {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("PipeOptions")
            .field("on_pipe_error", &self.on_pipe_error.as_ref().map(|_| ".."))
            .finish()
    }
}


// future types for channels.
pub(crate) mod future {
    use super::*;
    use crate::channel::{
        core,
        polling::{block_on, block_until},
    };
    use std::{
        task::{Poll, Context, ready},
        pin::Pin,
        mem::replace,
        time::{Duration, Instant},
    };

    /// Future for a [`Channel::send`]
    ///
    /// The send already took effect when it was called; this only reports when the value was
    /// admitted, or why it could not be. Dropping this does not take the value back.
    pub struct SendFut {
        recv: oneshot::Receiver<Result<(), SendError>>,
        terminated: bool,
    }

    impl SendFut {
        pub(super) fn new(recv: oneshot::Receiver<Result<(), SendError>>) -> Self {
            SendFut { recv, terminated: false }
        }

        /// Block until this future resolves
        ///
        /// Panics if this future has already resolved.
        pub fn block(&mut self) -> Result<(), SendError> {
            assert!(!self.terminated, "SendFut.block called after terminated");
            block_on(self)
        }

        /// Block until this future resolves or a timeout elapses
        ///
        /// On timing out, the value stays queued and this future may be waited on again. Panics if
        /// this future has already resolved.
        pub fn block_timeout(&mut self, timeout: Duration) -> Result<(), SendTimeoutError> {
            self.block_deadline(Instant::now() + timeout)
        }

        /// Block until this future resolves or the deadline is reached
        ///
        /// On timing out, the value stays queued and this future may be waited on again. Panics if
        /// this future has already resolved.
        pub fn block_deadline(&mut self, deadline: Instant) -> Result<(), SendTimeoutError> {
            assert!(!self.terminated, "SendFut.block_deadline called after terminated");
            Ok(block_until(self, deadline)??)
        }

        /// Whether this future has already resolved
        pub fn is_terminated(&self) -> bool {
            self.terminated
        }
    }

    impl Future for SendFut {
        type Output = Result<(), SendError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            // for implementation of FusedFuture
            if this.terminated {
                return Poll::Pending;
            }
            let result = ready!(Pin::new(&mut this.recv).poll(cx));
            this.terminated = true;
            // the completion can only be dropped uncalled if the whole channel was dropped with
            // this send still waiting for space
            Poll::Ready(result.unwrap_or_else(|_| Err(ClosedError.into())))
        }
    }

    #[cfg(feature = "futures")]
    impl futures::future::FusedFuture for SendFut {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }

    impl Debug for SendFut {
        fn fmt(&self, f: &mut Formatter) -> fmt::Result {
            f.debug_struct("SendFut")
                .field("terminated", &self.terminated)
                .finish_non_exhaustive()
        }
    }


    /// Future for a [`Channel::recv`]
    ///
    /// Waiting receives are served in the order they were created. If this is dropped after a
    /// value was handed to it but before it was observed, the value goes back into the channel
    /// ahead of every value sent after it, so racing a receive against a timeout never loses a
    /// value or reorders values.
    ///
    /// A closed channel is only exhausted once no value handed to a receive is still unobserved,
    /// so receives started after closing wait for such values to be given back.
    pub struct RecvFut<T> {
        channel: core::Channel<T>,
        state: RecvState<T>,
    }

    enum RecvState<T> {
        Ready(Result<core::Handed<T>, ExhaustedError>),
        Waiting(oneshot::Receiver<core::Handed<T>>),
        Terminated,
    }

    // never pinned structurally
    impl<T> Unpin for RecvFut<T> {}

    impl<T> RecvFut<T> {
        pub(super) fn new(
            channel: core::Channel<T>,
            pull: Result<core::Pull<T>, ExhaustedError>,
        ) -> Self {
            let state = match pull {
                Ok(core::Pull::Ready(handed)) => RecvState::Ready(Ok(handed)),
                Ok(core::Pull::Waiting(recv)) => RecvState::Waiting(recv),
                Err(e) => RecvState::Ready(Err(e)),
            };
            RecvFut { channel, state }
        }

        /// Block until this future resolves
        ///
        /// Panics if this future has already resolved.
        pub fn block(&mut self) -> Result<T, ExhaustedError> {
            assert!(!self.is_terminated(), "RecvFut.block called after terminated");
            block_on(self)
        }

        /// Block until this future resolves or a timeout elapses
        ///
        /// On timing out, this future is still waiting in line and may be waited on again. Panics
        /// if this future has already resolved.
        pub fn block_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
            self.block_deadline(Instant::now() + timeout)
        }

        /// Block until this future resolves or the deadline is reached
        ///
        /// On timing out, this future is still waiting in line and may be waited on again. Panics
        /// if this future has already resolved.
        pub fn block_deadline(&mut self, deadline: Instant) -> Result<T, RecvTimeoutError> {
            assert!(!self.is_terminated(), "RecvFut.block_deadline called after terminated");
            Ok(block_until(self, deadline)??)
        }

        /// Whether this future has already resolved
        pub fn is_terminated(&self) -> bool {
            matches!(self.state, RecvState::Terminated)
        }
    }

    impl<T> Future for RecvFut<T> {
        type Output = Result<T, ExhaustedError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            let result = match replace(&mut this.state, RecvState::Terminated) {
                RecvState::Ready(result) => result,
                RecvState::Waiting(mut recv) => match Pin::new(&mut recv).poll(cx) {
                    // a dropped sender means the pull was rejected
                    Poll::Ready(result) => result.map_err(|_| ExhaustedError),
                    Poll::Pending => {
                        this.state = RecvState::Waiting(recv);
                        return Poll::Pending;
                    }
                },
                // for implementation of FusedFuture
                RecvState::Terminated => return Poll::Pending,
            };
            Poll::Ready(result.map(|handed| {
                this.channel.transact(|lock| lock.observe());
                handed.value
            }))
        }
    }

    #[cfg(feature = "futures")]
    impl<T> futures::future::FusedFuture for RecvFut<T> {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }

    impl<T> Drop for RecvFut<T> {
        fn drop(&mut self) {
            let unobserved = match replace(&mut self.state, RecvState::Terminated) {
                RecvState::Ready(Ok(handed)) => Some(handed),
                RecvState::Waiting(mut recv) => {
                    recv.close();
                    recv.try_recv().ok()
                }
                _ => None,
            };
            if let Some(handed) = unobserved {
                trace!(seq = handed.seq, "receive dropped before observing its value, giving it back");
                self.channel.transact(|lock| lock.restore(handed));
            }
        }
    }

    impl<T> Debug for RecvFut<T> {
        fn fmt(&self, f: &mut Formatter) -> fmt::Result {
            let state = match self.state {
                RecvState::Ready(_) => "ready",
                RecvState::Waiting(_) => "waiting",
                RecvState::Terminated => "terminated",
            };
            f.debug_struct("RecvFut")
                .field("state", &state)
                .finish_non_exhaustive()
        }
    }
}


// ==== tests ====
