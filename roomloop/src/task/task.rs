use crate::context;
use crate::runtime::RoomCx;
use crate::task::harness::{BoxFuture, MakeFuture};
use crate::task::{
    AsyncTask, CancelToken, Cancellable, Completion, Dispatcher, Id, RoomId, TaskError,
    panic_payload_as_str,
};
use futures::FutureExt;
use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Shape of a task as submitted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Fire-and-forget synchronous work.
    SyncVoid,

    /// Synchronous work producing a value.
    SyncValue,

    /// Asynchronous work without a value, awaited for completion only.
    AsyncVoid,

    /// Asynchronous work producing a value.
    AsyncValue,
}

impl TaskKind {
    pub fn is_async(&self) -> bool {
        matches!(self, TaskKind::AsyncVoid | TaskKind::AsyncValue)
    }
}

/// Synchronous task body. Catches its own panics.
pub(crate) type SyncFn<R> = Box<dyn FnOnce(&mut R) + Send + 'static>;

/// Unit of work executed while holding a room's tick lock.
pub(crate) enum RoomTask<R> {
    SyncVoid { id: Id, run: SyncFn<R> },
    SyncValue { id: Id, run: SyncFn<R> },

    /// First slice of an async task.
    AsyncVoid(Arc<AsyncTask<R>>),
    AsyncValue(Arc<AsyncTask<R>>),

    /// Later slice of an async task, submitted by its waker.
    Resume(Arc<AsyncTask<R>>),
}

impl<R: Send + 'static> RoomTask<R> {
    pub(crate) fn sync_void<F>(f: F) -> Self
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        let id = Id::next();

        let run: SyncFn<R> = Box::new(move |state: &mut R| {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(state))) {
                tracing::error!(
                    task = %id,
                    panic = panic_payload_as_str(&payload).unwrap_or("<non-string payload>"),
                    "posted task panicked"
                );
            }
        });

        RoomTask::SyncVoid { id, run }
    }

    pub(crate) fn sync_value<F, T>(f: F) -> (Self, Completion<T>)
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = Id::next();
        let (reporter, completion) = Completion::channel();

        let run: SyncFn<R> = Box::new(move |state: &mut R| {
            let res = panic::catch_unwind(AssertUnwindSafe(|| f(state)))
                .map_err(|payload| TaskError::panic(id, payload));

            // Receiver gone means nobody is interested in the result.
            let _ = reporter.send(res);
        });

        (RoomTask::SyncValue { id, run }, completion)
    }

    pub(crate) fn async_void<F, Fut>(dispatcher: Dispatcher<R>, f: F) -> (Self, Completion<()>)
    where
        F: FnOnce(RoomCx<R>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (task, completion) = Self::new_async(dispatcher, TaskKind::AsyncVoid, None, f);
        (RoomTask::AsyncVoid(task), completion)
    }

    pub(crate) fn async_value<F, Fut, T>(
        dispatcher: Dispatcher<R>,
        token: Option<CancelToken>,
        f: F,
    ) -> (Self, Completion<T>)
    where
        F: FnOnce(RoomCx<R>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, completion) = Self::new_async(dispatcher, TaskKind::AsyncValue, token, f);
        (RoomTask::AsyncValue(task), completion)
    }

    fn new_async<F, Fut, T>(
        dispatcher: Dispatcher<R>,
        kind: TaskKind,
        token: Option<CancelToken>,
        f: F,
    ) -> (Arc<AsyncTask<R>>, Completion<T>)
    where
        F: FnOnce(RoomCx<R>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = Id::next();
        let (reporter, completion) = Completion::channel();

        // `f` is called on first poll, inside `catch_unwind`. The user future
        // is also dropped in there, a cancelled future included.
        let make: MakeFuture<R> = Box::new(move |cx: RoomCx<R>| -> BoxFuture {
            Box::pin(async move {
                let body = async move {
                    match token {
                        Some(token) => Cancellable::new(f(cx), token, id).await,
                        None => Ok(f(cx).await),
                    }
                };

                let res = AssertUnwindSafe(body)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(TaskError::panic(id, payload)));

                if let Err(err) = &res {
                    tracing::debug!(task = %id, %err, "async task failed");
                }

                let _ = reporter.send(res);
            })
        });

        (AsyncTask::new(id, kind, dispatcher, make), completion)
    }

    /// Runs one slice of the task.
    ///
    /// The caller holds the tick lock of `room` and has entered a slice of it.
    pub(crate) fn execute(self, room: RoomId, state: &UnsafeCell<R>) {
        debug_assert!(context::is_in_slice(room));

        match self {
            RoomTask::SyncVoid { id, run } | RoomTask::SyncValue { id, run } => {
                if context::try_with_state(room, state, run).is_none() {
                    // Dropping `run` resolves a value task to `Unavailable`.
                    tracing::error!(%room, task = %id, "room state already borrowed, task dropped");
                }
            }
            RoomTask::AsyncVoid(task) | RoomTask::AsyncValue(task) | RoomTask::Resume(task) => {
                task.run();
            }
        }
    }
}

impl<R> RoomTask<R> {
    pub(crate) fn id(&self) -> Id {
        match self {
            RoomTask::SyncVoid { id, .. } | RoomTask::SyncValue { id, .. } => *id,
            RoomTask::AsyncVoid(task) | RoomTask::AsyncValue(task) | RoomTask::Resume(task) => {
                task.id()
            }
        }
    }

    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            RoomTask::SyncVoid { .. } => TaskKind::SyncVoid,
            RoomTask::SyncValue { .. } => TaskKind::SyncValue,
            RoomTask::AsyncVoid(task) | RoomTask::AsyncValue(task) | RoomTask::Resume(task) => {
                task.kind()
            }
        }
    }

    pub(crate) fn is_resume(&self) -> bool {
        matches!(self, RoomTask::Resume(_))
    }

    /// Disposes of a task the room refused to accept.
    pub(crate) fn reject(self) {
        tracing::debug!(task = %self.id(), kind = ?self.kind(), "task rejected, room closed");

        match self {
            RoomTask::SyncVoid { .. } | RoomTask::SyncValue { .. } => {}
            RoomTask::AsyncVoid(task) | RoomTask::AsyncValue(task) | RoomTask::Resume(task) => {
                task.abandon();
            }
        }
    }
}

impl<R> fmt::Debug for RoomTask<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomTask")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("resume", &self.is_resume())
            .finish()
    }
}
