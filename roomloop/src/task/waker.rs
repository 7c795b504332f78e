use crate::runtime::{RoomCx, Shared};
use crate::task::state::TransitionToNotified;
use crate::task::{AsyncTask, RoomId, RoomTask};
use futures::task::ArcWake;
use std::fmt;
use std::sync::{Arc, Weak};

/// Routes resumptions of suspended async tasks back into their room.
///
/// Every async task carries the dispatcher of the room it was submitted to.
/// The waker handed to the future while it is polled wraps the task itself,
/// and waking it goes through [`Dispatcher::dispatch`]: the resumption is
/// submitted like any other task, so it may run inline on the waking thread
/// if the room is idle, or be queued otherwise.
///
/// Holds the room weakly. A wake arriving after the room is gone drops the
/// future and resolves the task's completion to `TaskError::Unavailable`.
pub(crate) struct Dispatcher<R> {
    shared: Weak<Shared<R>>,
    room: RoomId,
}

impl<R: Send + 'static> Dispatcher<R> {
    pub(crate) fn new(shared: Weak<Shared<R>>, room: RoomId) -> Self {
        Self { shared, room }
    }

    pub(crate) fn cx(&self) -> RoomCx<R> {
        RoomCx::new(self.shared.clone(), self.room)
    }

    /// Submits a resumption of `task`, which must be in the `SCHEDULED` state.
    pub(crate) fn dispatch(&self, task: Arc<AsyncTask<R>>) {
        debug_assert!(!task.is_complete());

        match self.shared.upgrade() {
            Some(shared) => {
                // Rejections abandon the task.
                shared.submit(RoomTask::Resume(task));
            }
            None => {
                tracing::debug!(room = %self.room, task = %task.id(), "room gone, dropping resumption");
                task.abandon();
            }
        }
    }
}

impl<R> Clone for Dispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            room: self.room,
        }
    }
}

impl<R> fmt::Debug for Dispatcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("room", &self.room)
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl<R: Send + 'static> ArcWake for AsyncTask<R> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        match arc_self.state().transition_to_notified() {
            TransitionToNotified::Submit => {
                arc_self.dispatcher().dispatch(Arc::clone(arc_self));
            }
            TransitionToNotified::DoNothing => {}
        }
    }
}
