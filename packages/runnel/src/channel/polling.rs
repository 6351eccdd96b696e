// blocking on channel futures from synchronous code.
//
// design based on pollster crate: the waker sets a flag and signals a condvar that the blocked
// thread sleeps on between polls.

use super::error::WouldBlockError;
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Condvar, Mutex, PoisonError},
    task::{Context, Poll, Wake, Waker},
    time::Instant,
};


// poll the future until it resolves.
pub(crate) fn block_on<F>(fut: &mut F) -> F::Output
where
    F: Future + Unpin,
{
    let signal = Arc::new(Signal::default());
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);
    loop {
        if let Poll::Ready(output) = Pin::new(&mut *fut).poll(&mut cx) {
            return output;
        }
        signal.wait(None);
    }
}

// poll the future until it resolves or the deadline is reached, in which case return err. the
// future is left as it was, so it may be polled again later.
pub(crate) fn block_until<F>(fut: &mut F, deadline: Instant) -> Result<F::Output, WouldBlockError>
where
    F: Future + Unpin,
{
    let signal = Arc::new(Signal::default());
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);
    loop {
        if let Poll::Ready(output) = Pin::new(&mut *fut).poll(&mut cx) {
            return Ok(output);
        }
        if !signal.wait(Some(deadline)) {
            return Err(WouldBlockError);
        }
    }
}

// synchronization signal
#[derive(Default)]
struct Signal {
    // whether woken since the last wait.
    notified: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    // block until notified, or return false if the deadline passes first.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut notified = self.notified.lock().unwrap_or_else(PoisonError::into_inner);
        while !*notified {
            match deadline {
                None => {
                    notified = self.cond.wait(notified).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now())
                        else { return false };
                    notified = self.cond.wait_timeout(notified, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        *notified = false;
        true
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        *self.notified.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_one();
    }
}
