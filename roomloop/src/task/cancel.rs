use crate::task::{Id, TaskError};
use parking_lot::Mutex;
use pin_project::{pin_project, pinned_drop};
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

/// A cancellation signal shared between a caller and the asynchronous tasks
/// it submitted.
///
/// Cancellation is cooperative and only observed at suspension points: an
/// execution slice that is already running is never interrupted, and a task
/// still sitting in the pending queue is not removed from it. Cancelling
/// wakes every task currently suspended on the token so the cancellation is
/// noticed at its next resumption.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    waiters: Mutex<Waiters>,
}

/// Wakers of suspended tasks, keyed by registration.
#[derive(Default)]
struct Waiters {
    next_key: u64,
    slots: SmallVec<[(u64, Waker); 2]>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        let slots = std::mem::take(&mut self.inner.waiters.lock().slots);
        for (_, waker) in slots {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Registers `waker` under `key`, allocating a key on first use.
    fn register(&self, key: &mut Option<u64>, waker: &Waker) {
        let mut guard = self.inner.waiters.lock();

        // Re-check under the lock, `cancel` may have drained the list already.
        if self.is_cancelled() {
            drop(guard);
            waker.wake_by_ref();
            return;
        }

        let waiters = &mut *guard;
        let slot = key.and_then(|key| waiters.slots.iter_mut().find(|(k, _)| *k == key));

        match slot {
            Some((_, registered)) => {
                if !registered.will_wake(waker) {
                    *registered = waker.clone();
                }
            }
            None => {
                let next = waiters.next_key;
                waiters.next_key += 1;
                waiters.slots.push((next, waker.clone()));
                *key = Some(next);
            }
        }
    }

    fn deregister(&self, key: u64) {
        self.inner.waiters.lock().slots.retain(|(k, _)| *k != key);
    }

    #[cfg(test)]
    pub(crate) fn num_waiters(&self) -> usize {
        self.inner.waiters.lock().slots.len()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Future adapter honoring a [`CancelToken`] at suspension points.
///
/// The first poll always reaches the inner future, so a task that was
/// cancelled while queued still runs its first slice. Every later poll is a
/// resumption after a suspension; if the token is cancelled by then, the
/// inner future is abandoned and `TaskError::Cancelled` is returned.
///
/// The waker stays registered with the token only while the inner future is
/// suspended.
#[pin_project(PinnedDrop)]
#[derive(Debug)]
pub struct Cancellable<F> {
    #[pin]
    inner: F,
    token: CancelToken,
    id: Id,
    started: bool,
    key: Option<u64>,
}

impl<F> Cancellable<F> {
    pub(crate) fn new(inner: F, token: CancelToken, id: Id) -> Self {
        Self {
            inner,
            token,
            id,
            started: false,
            key: None,
        }
    }
}

impl<F: Future> Future for Cancellable<F> {
    type Output = Result<F::Output, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let res = if *this.started && this.token.is_cancelled() {
            Err(TaskError::Cancelled { id: *this.id })
        } else {
            *this.started = true;

            match this.inner.poll(cx) {
                Poll::Ready(out) => Ok(out),
                Poll::Pending => {
                    this.token.register(this.key, cx.waker());
                    return Poll::Pending;
                }
            }
        };

        if let Some(key) = this.key.take() {
            this.token.deregister(key);
        }

        Poll::Ready(res)
    }
}

#[pinned_drop]
impl<F> PinnedDrop for Cancellable<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();

        if let Some(key) = this.key.take() {
            this.token.deregister(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::counting_waker;
    use std::future::pending;
    use std::pin::pin;

    #[test]
    fn test_first_poll_runs_even_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();

        let (waker, _) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = pin!(Cancellable::new(async { 7 }, token, Id::next()));

        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(Ok(7))));
    }

    #[test]
    fn test_cancel_wakes_and_aborts_at_resumption() {
        let token = CancelToken::new();
        let id = Id::next();

        let (waker, wakes) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = pin!(Cancellable::new(pending::<()>(), token.clone(), id));

        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert_eq!(wakes.get_count(), 0);

        token.cancel();
        assert_eq!(wakes.get_count(), 1);

        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Err(err)) => assert_eq!(err, TaskError::Cancelled { id }),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancelToken::new();
        let (waker, wakes) = counting_waker();
        let mut key = None;
        token.register(&mut key, &waker);
        token.register(&mut key, &waker);
        assert_eq!(token.num_waiters(), 1);

        token.cancel();
        token.cancel();

        assert!(token.is_cancelled());
        assert_eq!(wakes.get_count(), 1);
    }

    #[test]
    fn test_waker_released_on_completion() {
        let token = CancelToken::new();
        let (waker, _) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let (tx, rx) = futures::channel::oneshot::channel::<u32>();
        let mut fut = pin!(Cancellable::new(rx, token.clone(), Id::next()));

        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert_eq!(token.num_waiters(), 1);

        tx.send(3).unwrap();
        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Ready(Ok(Ok(3)))));
        assert_eq!(token.num_waiters(), 0);
    }

    #[test]
    fn test_waker_released_on_drop() {
        let token = CancelToken::new();
        let (waker, _) = counting_waker();
        let mut cx = Context::from_waker(&waker);

        let mut fut = Box::pin(Cancellable::new(pending::<()>(), token.clone(), Id::next()));
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert_eq!(token.num_waiters(), 1);

        drop(fut);
        assert_eq!(token.num_waiters(), 0);
    }
}
