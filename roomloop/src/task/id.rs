use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a task submitted to any room.
///
/// IDs are handed out when a task is created, not when it runs, so they say
/// nothing about execution order. A continuation of an asynchronous task
/// keeps the ID of the task it resumes.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(NonZeroU64);

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Even at a billion tasks per second this takes centuries to wrap.
        let Some(id) = NonZeroU64::new(id) else {
            exhausted("task");
        };

        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

/// Identifies one room, i.e. one exclusivity domain.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct RoomId(NonZeroU64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl RoomId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let Some(id) = NonZeroU64::new(COUNTER.fetch_add(1, Ordering::Relaxed)) else {
            exhausted("room");
        };

        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

#[cold]
fn exhausted(what: &str) -> ! {
    panic!("failed to generate unique {what} ID: bitspace exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_task_ids_unique_across_threads() {
        let ids = thread::scope(|s| {
            let handles = (0..4)
                .map(|_| s.spawn(|| (0..250).map(|_| Id::next()).collect::<Vec<_>>()))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<HashSet<_>>()
        });

        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_room_ids_increase() {
        let a = RoomId::next();
        let b = RoomId::next();
        assert!(b > a);
        assert_ne!(a.to_string(), b.to_string());
    }
}
