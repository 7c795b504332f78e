//! Per-room task scheduling for simulation servers.
//!
//! A server hosts many rooms, each advanced by a periodic tick and at the
//! same time targeted by work coming from arbitrary other threads: network
//! handlers, timers, other rooms. `roomloop` guarantees that the state of a
//! room is never mutated by two executions at once, without a global lock
//! and without funnelling every request through a queue:
//!
//! - a caller that finds the room idle runs its task inline (fast path);
//! - a caller that finds it busy queues the task, and the current owner of
//!   the room, normally the tick loop, runs it (slow path);
//! - async tasks suspend freely and are resumed *inside* the room, even
//!   when the awaited dependency completes on an unrelated thread.
//!
//! ```
//! use roomloop::Room;
//!
//! let room = Room::new(0u64);
//!
//! // Idle room: runs inline, the result is ready right away.
//! let mut value = room.schedule(|counter| {
//!     *counter += 10;
//!     *counter
//! });
//! assert_eq!(value.try_take(), Some(Ok(10)));
//!
//! // Async work resumes inside the room after every `.await`.
//! let done = room.schedule_async(|cx| async move {
//!     roomloop::task::yield_now().await;
//!     cx.with(|counter| *counter * 2)
//! });
//!
//! // The yield queued the resumption behind the room; the next tick runs it.
//! room.tick_with(|_, _| {});
//! assert_eq!(done.wait(), Ok(20));
//!
//! room.shutdown();
//! ```

mod context;

pub mod room;
pub use room::{Room, Simulation};

pub mod runtime;
pub use runtime::{Builder, RoomCx, RoomScheduler, TickGuard};

pub mod task;
pub use task::{CancelToken, Completion, TaskError};

mod utils;

#[cfg(test)]
mod test_utils;
