// implementation of the runnel channel.
//
// the architecture is as such:
//
// channel handles wrap around Arc<Mutex<shared state>>
//                                         |
//          /------------------------------/
//          v
//       shared state
//          |
//          |------ it contains a VecDeque buffer of admitted values, each tagged with a sequence
//          |       number in send order
//          |
//          |------ it contains a queue of pending pulls. each is the sending half of a tokio
//          |       oneshot, whose receiving half lives in a recv future. handing a value to a pull
//          |       is just sending on the oneshot, and dropping the sending half rejects the pull.
//          |       a recv future dropped before observing its value gives it back, and the
//          |       sequence number puts it back where it was.
//          |
//          |------ it contains a queue of pending pushes. each is a value waiting for buffer
//          |       space, along with a completion callback for its send future.
//          |
//          \------ it contains the pipe and pause state.
//
// nothing that runs user code, meaning send completions and pipe sinks, runs with the lock held.
// completions are collected while locked and run after unlocking. while piped, the buffer is
// relayed to the sink by whichever caller finds nobody else relaying it, one value at a time,
// checking the pause gate before each value. this keeps deliveries in order even when a sink
// sends into, or pauses, the channel it is draining.
//
// the organization of these modules is as such:
//
//      core: The state machine. Safe and minimal, but with no futures, blocking, or validation.
//       ^
//       |
//      api<---------polling: This wraps core into the exposed API with futures, and blocking
//       ^                    versions of them built on polling. The crate re-exports this API
//       |                    publicly.
//       |
//      stream: A stream view built from repeated receives through api.
//
// there is also the error module, which contains the relevant error types, which is also
// re-exported publicly.

pub(crate) mod error;
pub(crate) mod api;
pub(crate) mod stream;

mod polling;
mod core;
