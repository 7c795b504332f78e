use bitflags::bitflags;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

bitflags! {
    /// Lifecycle bits of an async task.
    ///
    /// An idle task (suspended, waiting for a wake) has no bit set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct Lifecycle: u8 {
        /// A resumption is in flight: the task sits in the pending queue, or
        /// is about to run on the fast path.
        const SCHEDULED = 1;

        /// The task is being polled inside an execution slice.
        const RUNNING = 1 << 1;

        /// Woken while running, must be scheduled again once the poll returns.
        const NOTIFIED = 1 << 2;

        /// The future returned `Ready` or was abandoned. Terminal.
        const COMPLETE = 1 << 3;
    }
}

pub(crate) struct State {
    val: AtomicU8,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToRunning {
    Success,

    /// Not scheduled, or already complete. Nothing to poll.
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToIdle {
    Ok,

    /// A wake arrived during the poll. The task is `SCHEDULED` again and the
    /// caller must dispatch it.
    OkNotified,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToNotified {
    /// The task was idle and is now `SCHEDULED`: the caller must dispatch it.
    Submit,

    /// Already scheduled, complete, or will be rescheduled by the running
    /// slice.
    DoNothing,
}

impl State {
    /// New tasks start out scheduled, their first slice is owed to them.
    pub(crate) fn new() -> Self {
        Self {
            val: AtomicU8::new(Lifecycle::SCHEDULED.bits()),
        }
    }

    pub(crate) fn load(&self) -> Lifecycle {
        Lifecycle::from_bits_retain(self.val.load(Ordering::Acquire))
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.load().contains(Lifecycle::COMPLETE)
    }

    pub(crate) fn transition_to_running(&self) -> TransitionToRunning {
        self.fetch_update_action(|curr| {
            if curr.contains(Lifecycle::COMPLETE) || !curr.contains(Lifecycle::SCHEDULED) {
                return (TransitionToRunning::Failed, None);
            }

            debug_assert!(!curr.contains(Lifecycle::RUNNING));
            (TransitionToRunning::Success, Some(Lifecycle::RUNNING))
        })
    }

    pub(crate) fn transition_to_idle(&self) -> TransitionToIdle {
        self.fetch_update_action(|curr| {
            debug_assert!(curr.contains(Lifecycle::RUNNING));

            if curr.contains(Lifecycle::NOTIFIED) {
                (TransitionToIdle::OkNotified, Some(Lifecycle::SCHEDULED))
            } else {
                (TransitionToIdle::Ok, Some(Lifecycle::empty()))
            }
        })
    }

    pub(crate) fn transition_to_notified(&self) -> TransitionToNotified {
        self.fetch_update_action(|curr| {
            if curr.intersects(Lifecycle::COMPLETE | Lifecycle::SCHEDULED | Lifecycle::NOTIFIED) {
                (TransitionToNotified::DoNothing, None)
            } else if curr.contains(Lifecycle::RUNNING) {
                (TransitionToNotified::DoNothing, Some(curr | Lifecycle::NOTIFIED))
            } else {
                (TransitionToNotified::Submit, Some(Lifecycle::SCHEDULED))
            }
        })
    }

    /// Marks the task complete. Returns the previous lifecycle.
    pub(crate) fn set_complete(&self) -> Lifecycle {
        Lifecycle::from_bits_retain(
            self.val
                .fetch_or(Lifecycle::COMPLETE.bits(), Ordering::AcqRel),
        )
    }

    /// Runs `f` against the current value until the CAS succeeds, storing the
    /// returned lifecycle if any.
    fn fetch_update_action<T>(&self, mut f: impl FnMut(Lifecycle) -> (T, Option<Lifecycle>)) -> T {
        let mut curr = self.load();

        loop {
            let (action, next) = f(curr);

            let Some(next) = next else {
                return action;
            };

            match self.val.compare_exchange_weak(
                curr.bits(),
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return action,
                Err(actual) => curr = Lifecycle::from_bits_retain(actual),
            }
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(), f)
    }
}
