//! Typed channel with bounding, closing, piping, and pause/resume flow control.
//!
//! See [`Channel`].

#[macro_use]
extern crate tracing;

mod channel;
pub mod sink;

pub use crate::{
    channel::{
        api::*,
        stream::RecvStream,
    },
    sink::Sink,
};

/// Error types
pub mod error {
    pub use crate::channel::error::*;
}

/// Future types
pub mod future {
    pub use crate::channel::api::future::*;
}
