use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Ends the current execution slice of an async task.
///
/// The task is resubmitted to its room right away. Since the tick lock is
/// still held while the slice unwinds, the resumption always lands in the
/// pending queue behind the tasks already waiting there. A drain in progress
/// picks it up in the same pass, otherwise the next drain runs it.
///
/// A drain only returns once the queue is empty, so a task yielding in a
/// loop keeps the drain running until it completes.
pub fn yield_now() -> YieldNow {
    YieldNow {
        awaiting_first_poll: true,
    }
}

#[derive(Debug, Clone, Copy)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    awaiting_first_poll: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Only yield on first poll. Next time the task runs we return.
        if self.awaiting_first_poll {
            self.awaiting_first_poll = false;
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::counting_waker;
    use std::pin::pin;

    #[test]
    fn test_wakes_itself_once() {
        let (waker, counter) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = pin!(yield_now());

        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert_eq!(counter.get_count(), 1);

        assert!(fut.as_mut().poll(&mut cx).is_ready());
        assert_eq!(counter.get_count(), 1);
    }
}
