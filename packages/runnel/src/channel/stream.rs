// stream view over a channel's receive side.

use super::{
    api::{Channel, future::RecvFut},
    error::ExhaustedError,
};
use std::{
    fmt::{self, Formatter, Debug},
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
};


/// Stream of values received from a [`Channel`]
///
/// Created by [`Channel::stream`]. Every element is one receive from the channel, so streams over
/// the same channel, and any other receivers, compete for its values rather than each seeing all
/// of them. Nothing is received until the stream is first polled.
///
/// As a `futures::Stream`, this ends once the channel is closed and exhausted. For the raw receive
/// that fails with [`ExhaustedError`] instead, use [`pull`](Self::pull).
///
/// Dropping the stream while it is waiting on a receive gives back any value already handed to
/// it. Values the stream never received stay in the channel.
pub struct RecvStream<T> {
    channel: Channel<T>,
    // receive started by a poll that returned pending.
    pending: Option<RecvFut<T>>,
    terminated: bool,
}

impl<T> RecvStream<T> {
    pub(crate) fn new(channel: Channel<T>) -> Self {
        RecvStream {
            channel,
            pending: None,
            terminated: false,
        }
    }

    /// Receive the next value, failing with [`ExhaustedError`] if the channel is closed and empty
    ///
    /// If a poll of this stream already started a receive, that receive is returned so no value
    /// is skipped.
    pub fn pull(&mut self) -> RecvFut<T> {
        self.pending.take().unwrap_or_else(|| self.channel.recv())
    }

    /// The channel this stream receives from
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    /// Whether this stream has ended
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    #[cfg_attr(not(feature = "futures"), allow(dead_code))]
    fn poll_pull(&mut self, cx: &mut Context) -> Poll<Option<T>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        let pending = self.pending.get_or_insert_with(|| self.channel.recv());
        let result = ready!(Pin::new(pending).poll(cx));
        self.pending = None;
        match result {
            Ok(value) => Poll::Ready(Some(value)),
            Err(ExhaustedError) => {
                trace!("stream reached end of closed channel");
                self.terminated = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(feature = "futures")]
impl<T> futures::stream::Stream for RecvStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        self.get_mut().poll_pull(cx)
    }
}

#[cfg(feature = "futures")]
impl<T> futures::stream::FusedStream for RecvStream<T> {
    fn is_terminated(&self) -> bool {
        Self::is_terminated(self)
    }
}

impl<T> Debug for RecvStream<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("RecvStream")
            .field("channel", &self.channel)
            .field("pending", &self.pending.is_some())
            .field("terminated", &self.terminated)
            .finish()
    }
}
