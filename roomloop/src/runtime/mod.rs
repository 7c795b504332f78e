//! Per-room scheduling: locks, pending queue, and the dispatch protocol.

// Public API
mod builder;
pub use builder::Builder;

mod scheduler;
pub use scheduler::{RoomCx, RoomScheduler, TickGuard};

// Exports
pub(crate) use builder::SchedulerConfig;

mod lock;
pub use lock::ExclusiveLock;

mod queue;
pub(crate) use queue::PendingQueue;

pub(crate) use scheduler::Shared;
