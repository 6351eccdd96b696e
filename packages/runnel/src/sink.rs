//! Destinations that a channel can be piped into.
//!
//! A [`Sink`] is anything that can be handed a value and later report whether it took it. The
//! two sinks provided are [`Channel`](crate::Channel) itself, which applies its normal send
//! admission rules, and [`FnSink`], which wraps a plain function.

use crate::error::PipeError;
use std::fmt::{self, Formatter, Debug};


/// Completion callback for a value handed to a [`Sink`]
///
/// Must be called exactly once, either right away or once the sink has made room for the value.
pub type Delivered = Box<dyn FnOnce(Result<(), PipeError>) + Send>;

/// Something a channel can forward values into
pub trait Sink<T>: Send + Sync {
    /// Offer a value to the sink
    ///
    /// Must not block. If the sink can not take the value yet, it should queue it and call `done`
    /// once it has been admitted.
    fn accept(&self, value: T, done: Delivered);
}

/// Sink adapter for a plain function
///
/// The function is called once per forwarded value. It has no queueing of its own, so a
/// forwarded value is complete as soon as the function returns.
#[derive(Clone)]
pub struct FnSink<F>(F);

/// Wrap a function as a [`Sink`]
pub fn from_fn<T, E, F>(f: F) -> FnSink<F>
where
    F: Fn(T) -> Result<(), E> + Send + Sync,
    E: Into<anyhow::Error>,
{
    FnSink(f)
}

impl<T, E, F> Sink<T> for FnSink<F>
where
    F: Fn(T) -> Result<(), E> + Send + Sync,
    E: Into<anyhow::Error>,
{
    fn accept(&self, value: T, done: Delivered) {
        done((self.0)(value).map_err(|e| PipeError::Sink(e.into())));
    }
}

impl<F> Debug for FnSink<F> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("FnSink(..)")
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn fn_sink_reports_each_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_2 = Arc::clone(&seen);
        let sink = from_fn(move |n: u32| {
            if n == 3 {
                anyhow::bail!("three is not allowed");
            }
            seen_2.lock().unwrap().push(n);
            Ok(())
        });

        let results = Arc::new(Mutex::new(Vec::new()));
        for n in 1..=4 {
            let results = Arc::clone(&results);
            sink.accept(n, Box::new(move |r| results.lock().unwrap().push(r.is_ok())));
        }

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 4]);
        assert_eq!(*results.lock().unwrap(), vec![true, true, false, true]);
    }

    #[test]
    fn fn_sink_error_message() {
        let sink = from_fn(|_: ()| Err(std::io::Error::other("disk on fire")));
        let message = Arc::new(Mutex::new(None));
        let message_2 = Arc::clone(&message);
        sink.accept((), Box::new(move |r| {
            *message_2.lock().unwrap() = r.err().map(|e| e.to_string());
        }));
        assert_eq!(message.lock().unwrap().as_deref(), Some("pipe sink failed: disk on fire"));
    }
}
