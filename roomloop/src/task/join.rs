use crate::task::TaskError;
use futures::FutureExt;
use futures::channel::oneshot;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Sending half of a [`Completion`], owned by the task.
pub(crate) type Reporter<T> = oneshot::Sender<Result<T, TaskError>>;

/// Handle to the outcome of a task submitted to a room.
///
/// A `Completion` is returned by every result-returning scheduling operation
/// and resolves exactly once, whichever path the task took:
///
/// - when the task ran inline on the fast path and finished inside its first
///   slice, the result is already stored and [`Completion::try_take`] returns
///   it before the scheduling call has even returned to the caller;
/// - otherwise the result is delivered by whichever thread ends up running the
///   last slice of the task.
///
/// Awaiting the handle yields `Err(TaskError::Unavailable)` if the task was
/// dropped without running, which only happens when the room scheduler is
/// closed.
///
/// Dropping a `Completion` does not cancel the task, it only discards its
/// result.
///
/// ```
/// use roomloop::RoomScheduler;
///
/// let scheduler = RoomScheduler::new(Vec::<u32>::new());
/// let mut len = scheduler.schedule(|items| {
///     items.push(7);
///     items.len()
/// });
///
/// // The room was idle, so the task ran on the calling thread.
/// assert_eq!(len.try_take(), Some(Ok(1)));
/// ```
#[must_use = "a completion does nothing unless awaited or inspected"]
pub struct Completion<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    /// Result known when the handle was created.
    Ready(Option<Result<T, TaskError>>),

    /// Result delivered later by the task.
    Pending(oneshot::Receiver<Result<T, TaskError>>),

    /// Result already handed out.
    Taken,
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Reporter<T>, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Completion {
                inner: Inner::Pending(rx),
            },
        )
    }

    pub(crate) fn ready(res: Result<T, TaskError>) -> Completion<T> {
        Completion {
            inner: Inner::Ready(Some(res)),
        }
    }

    pub(crate) fn unavailable() -> Completion<T> {
        Self::ready(Err(TaskError::Unavailable))
    }

    /// Returns the result if the task already finished, without blocking and
    /// without registering interest.
    ///
    /// Returns `None` while the task is still pending, and after the result
    /// has been taken once.
    pub fn try_take(&mut self) -> Option<Result<T, TaskError>> {
        let res = match &mut self.inner {
            Inner::Ready(res) => res.take(),
            Inner::Pending(rx) => match rx.try_recv() {
                Ok(Some(res)) => Some(res),
                Ok(None) => return None,
                Err(oneshot::Canceled) => Some(Err(TaskError::Unavailable)),
            },
            Inner::Taken => return None,
        };

        self.inner = Inner::Taken;
        res
    }

    /// Blocks the current thread until the task finishes.
    ///
    /// Must not be called from inside a task of the same room: the task this
    /// waits for can never get the room while the caller holds it.
    pub fn wait(self) -> Result<T, TaskError> {
        futures::executor::block_on(self)
    }
}

impl<T> Unpin for Completion<T> {}

impl<T> Future for Completion<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = match &mut self.inner {
            Inner::Ready(res) => res.take().unwrap_or(Err(TaskError::Unavailable)),
            Inner::Pending(rx) => match rx.poll_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(res)) => res,
                // Reporter dropped without sending: the task never ran to completion.
                Poll::Ready(Err(oneshot::Canceled)) => Err(TaskError::Unavailable),
            },
            Inner::Taken => panic!("`Completion` polled after its result was taken"),
        };

        self.inner = Inner::Taken;
        Poll::Ready(res)
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            Inner::Ready(_) => "ready",
            Inner::Pending(_) => "pending",
            Inner::Taken => "taken",
        };

        f.debug_struct("Completion").field("state", &state).finish()
    }
}
