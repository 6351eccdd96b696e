// channel error types.

use std::fmt::{self, Display, Formatter, Debug};
use thiserror::Error;


// ==== base error types ====


/// Error for constructing a channel with a negative capacity
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("invalid channel capacity {0}, capacity must be non-negative")]
pub struct InvalidCapacityError(pub i64);

/// Error for trying to send into a bounded channel which is full and has no waiting receiver
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("channel is full")]
pub struct FullError;

/// Error for trying to send into a channel which has been closed
///
/// Also used to release sends that were still waiting for buffer space when the channel closed.
/// The values of such sends are dropped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("channel is closed")]
pub struct ClosedError;

/// Terminal error for trying to receive from a channel which is closed and fully drained
///
/// A closed channel only returns this once no value handed to a receive is still unobserved, as
/// such a value could be given back. From then on, it returns this for every later receive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("channel is closed and exhausted")]
pub struct ExhaustedError;

/// Error for a blocking operation not completing by the specified deadline
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("operation did not complete before the deadline")]
pub struct WouldBlockError;


// ==== pipe errors ====


/// Error for a value forwarded through a pipe failing to be accepted by the sink
#[derive(Debug, Error)]
pub enum PipeError {
    /// The sink is a channel which has been closed
    #[error("pipe sink is closed")]
    Closed(#[from] ClosedError),
    /// The sink rejected the value
    #[error("pipe sink failed: {0:#}")]
    Sink(anyhow::Error),
}


// a channel forwarding into another channel sees that channel's send failure as a pipe failure.
impl From<SendError> for PipeError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Closed(e) => PipeError::Closed(e),
            SendError::Pipe(e) => e,
        }
    }
}


// ==== compound error types ====


/// Error for a send into a channel failing
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel was closed before the value was admitted
    #[error(transparent)]
    Closed(#[from] ClosedError),
    /// The channel is piped, has no pipe error handler, and forwarding the value failed
    #[error(transparent)]
    Pipe(#[from] PipeError),
}

/// Error for trying to send into a channel without waiting
///
/// Hands back the value that could not be sent.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TrySendError<T> {
    /// The value that could not be sent
    pub value: T,
    /// The reason the value could not be sent
    pub cause: TrySendErrorCause,
}

/// Reason for a [`TrySendError`] occurring
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum TrySendErrorCause {
    /// The channel is bounded, full, and no receiver is waiting
    ///
    /// This is recoverable: the send may be retried later.
    #[error(transparent)]
    Full(#[from] FullError),
    /// The channel has been closed
    #[error(transparent)]
    Closed(#[from] ClosedError),
}

impl<T> TrySendError<T> {
    /// Whether this is a [`FullError`], and thus worth retrying
    pub fn is_full(&self) -> bool {
        matches!(self.cause, TrySendErrorCause::Full(_))
    }

    /// Whether this is a [`ClosedError`]
    pub fn is_closed(&self) -> bool {
        matches!(self.cause, TrySendErrorCause::Closed(_))
    }
}

// not requiring T: Debug, since values are often not Debug
impl<T> Debug for TrySendError<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("TrySendError")
            .field("cause", &self.cause)
            .finish_non_exhaustive()
    }
}

impl<T> Display for TrySendError<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&self.cause, f)
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Error for sending the output of a fallible future into a channel
#[derive(Debug, Error)]
pub enum SendAsyncError<E> {
    /// The input future failed, so nothing was sent
    #[error("input failed: {0}")]
    Input(E),
    /// The input future succeeded, but sending its value failed
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Error for blocking on a send with a deadline
#[derive(Debug, Error)]
pub enum SendTimeoutError {
    /// The send resolved to an error
    #[error(transparent)]
    Terminal(#[from] SendError),
    /// The send did not resolve by the deadline, and is still queued
    #[error(transparent)]
    WouldBlock(#[from] WouldBlockError),
}

/// Error for blocking on a receive with a deadline
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum RecvTimeoutError {
    /// The channel is closed and exhausted
    #[error(transparent)]
    Terminal(#[from] ExhaustedError),
    /// No value arrived by the deadline
    #[error(transparent)]
    WouldBlock(#[from] WouldBlockError),
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn send_async_error_display_and_source() {
        let input = SendAsyncError::<std::io::Error>::Input(std::io::Error::other("no value"));
        assert_eq!(input.to_string(), "input failed: no value");

        let send = SendAsyncError::<std::io::Error>::from(SendError::from(ClosedError));
        assert_eq!(send.to_string(), "channel is closed");
        assert!(matches!(send, SendAsyncError::Send(SendError::Closed(_))));
    }

    #[test]
    fn channel_send_failure_becomes_pipe_failure() {
        assert!(matches!(PipeError::from(SendError::from(ClosedError)), PipeError::Closed(_)));
        let inner = PipeError::Sink(anyhow::anyhow!("full disk"));
        let e = PipeError::from(SendError::from(inner));
        assert_eq!(e.to_string(), "pipe sink failed: full disk");
        assert!(e.source().is_none());
    }
}
