use crate::runtime::RoomCx;
use crate::task::state::{Lifecycle, State, TransitionToIdle, TransitionToRunning};
use crate::task::{Dispatcher, Id, TaskKind, panic_payload_as_str};
use futures::task::waker_ref;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Type-erased future of an async task. Reports its own outcome.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Creates the task's future. Called inside the task's first slice.
pub(crate) type MakeFuture<R> = Box<dyn FnOnce(RoomCx<R>) -> BoxFuture + Send + 'static>;

enum Stage<R> {
    Init(MakeFuture<R>),
    Running(BoxFuture),
    Finished,
}

/// Heap-allocated async task, shared by the pending queue and its wakers.
///
/// The task is driven one slice at a time by [`AsyncTask::run`]. Every slice
/// runs on a thread that holds the room's tick lock; between slices the task
/// is either idle, waiting for a wake, or scheduled, waiting for its
/// resumption to be picked up.
pub(crate) struct AsyncTask<R> {
    id: Id,
    kind: TaskKind,
    state: State,
    stage: Mutex<Stage<R>>,
    dispatcher: Dispatcher<R>,
}

impl<R: Send + 'static> AsyncTask<R> {
    pub(crate) fn new(
        id: Id,
        kind: TaskKind,
        dispatcher: Dispatcher<R>,
        make: MakeFuture<R>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            state: State::new(),
            stage: Mutex::new(Stage::Init(make)),
            dispatcher,
        })
    }

    /// Runs one slice: polls the future once with a waker routed to the
    /// room's dispatcher.
    ///
    /// Must be called from inside an execution slice of the task's room.
    pub(crate) fn run(self: &Arc<Self>) {
        match self.state.transition_to_running() {
            TransitionToRunning::Success => {}
            TransitionToRunning::Failed => {
                tracing::trace!(task = %self.id, state = ?self.state, "stale resumption skipped");
                return;
            }
        }

        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);

        let poll = {
            let mut stage = self.stage.lock();

            if matches!(*stage, Stage::Init(_)) {
                if let Stage::Init(make) = mem::replace(&mut *stage, Stage::Finished) {
                    *stage = Stage::Running(make(self.dispatcher.cx()));
                }
            }

            let poll = match &mut *stage {
                Stage::Running(fut) => fut.as_mut().poll(&mut cx),
                // Abandoned while scheduled, nothing left to poll.
                Stage::Init(_) | Stage::Finished => Poll::Ready(()),
            };

            if poll.is_ready() {
                *stage = Stage::Finished;
            }

            poll
        };

        match poll {
            Poll::Ready(()) => {
                self.state.set_complete();
                tracing::trace!(task = %self.id, kind = ?self.kind, "async task complete");
            }
            Poll::Pending => match self.state.transition_to_idle() {
                TransitionToIdle::Ok => {
                    tracing::trace!(task = %self.id, "async task suspended");
                }
                TransitionToIdle::OkNotified => {
                    self.dispatcher.dispatch(Arc::clone(self));
                }
            },
        }
    }
}

impl<R> AsyncTask<R> {
    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.kind
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    pub(crate) fn state(&self) -> &State {
        &self.state
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher<R> {
        &self.dispatcher
    }

    /// Drops the future without running it further. Its completion resolves
    /// to `TaskError::Unavailable`.
    ///
    /// Must not be called while the task is being polled.
    pub(crate) fn abandon(&self) {
        let prev = self.state.set_complete();
        debug_assert!(!prev.contains(Lifecycle::RUNNING));

        let stage = mem::replace(&mut *self.stage.lock(), Stage::Finished);

        // The future may own wakers or completions of other tasks, drop it
        // outside of the lock. Its `Drop` is user code and may panic.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| drop(stage))) {
            tracing::error!(
                task = %self.id,
                panic = panic_payload_as_str(&payload).unwrap_or("<non-string payload>"),
                "abandoned task panicked while dropped"
            );
        }

        tracing::debug!(task = %self.id, kind = ?self.kind, "async task abandoned");
    }
}

impl<R> fmt::Debug for AsyncTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish()
    }
}
