//! Tasks submitted to a room and the machinery driving them.
//!
//! Synchronous tasks are boxed closures run once. Asynchronous tasks live in
//! an [`AsyncTask`] harness that polls their future one slice at a time and
//! routes wakes back into the room through a [`Dispatcher`].

mod cancel;
pub use self::cancel::{CancelToken, Cancellable};

mod error;
pub use self::error::TaskError;
pub(crate) use self::error::panic_payload_as_str;

mod harness;
pub(crate) use self::harness::AsyncTask;

pub mod id;
pub use self::id::{Id, RoomId};

mod join;
pub use self::join::Completion;

mod state;

#[allow(clippy::module_inception)]
mod task;
pub(crate) use self::task::RoomTask;
pub use self::task::TaskKind;

mod waker;
pub(crate) use self::waker::Dispatcher;

mod yield_now;
pub use self::yield_now::{YieldNow, yield_now};
