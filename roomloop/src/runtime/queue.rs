use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Set once the queue stops accepting tasks.
const CLOSED: usize = 1;

/// One in-flight `push`. Writers are counted above the `CLOSED` bit.
const WRITER: usize = 1 << 1;

/// Unbounded multi-producer queue of tasks waiting for exclusive execution.
///
/// Any thread may push. Popping is only done by the thread holding the drain
/// lock, so there is a single consumer at a time.
///
/// Closing is final. A push racing with `close` either lands before `close`
/// returns or is rejected; nothing is ever enqueued after `close` returned.
pub(crate) struct PendingQueue<T> {
    tasks: SegQueue<T>,

    /// `CLOSED` bit plus a count of pushes in flight.
    state: AtomicUsize,
}

impl<T> PendingQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: SegQueue::new(),
            state: AtomicUsize::new(0),
        }
    }

    /// Enqueues `task`, or hands it back if the queue is closed.
    pub(crate) fn push(&self, task: T) -> Result<(), T> {
        let prev = self.state.fetch_add(WRITER, Ordering::AcqRel);

        let res = if prev & CLOSED == CLOSED {
            Err(task)
        } else {
            self.tasks.push(task);
            Ok(())
        };

        self.state.fetch_sub(WRITER, Ordering::Release);
        res
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.tasks.pop()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSED == CLOSED
    }

    /// Stops accepting tasks and waits for in-flight pushes to settle.
    ///
    /// Already queued tasks stay in the queue. Returns `true` if this call
    /// closed the queue.
    pub(crate) fn close(&self) -> bool {
        let prev = self.state.fetch_or(CLOSED, Ordering::AcqRel);

        // Pushes are a handful of instructions long.
        while self.state.load(Ordering::Acquire) & !CLOSED != 0 {
            thread::yield_now();
        }

        prev & CLOSED == 0
    }
}

impl<T> fmt::Debug for PendingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let q = PendingQueue::new();
        for i in 0..5 {
            assert!(q.push(i).is_ok());
        }

        let drained = std::iter::from_fn(|| q.pop()).collect::<Vec<_>>();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_after_close_hands_task_back() {
        let q = PendingQueue::new();
        assert!(q.push("kept").is_ok());

        assert!(q.close());
        assert!(!q.close(), "second close is a no-op");
        assert!(q.is_closed());

        assert_eq!(q.push("rejected"), Err("rejected"));
        assert_eq!(q.pop(), Some("kept"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_close_racing_producers_loses_nothing() {
        let q = Arc::new(PendingQueue::new());

        let (accepted, rejected) = thread::scope(|s| {
            let producers = (0..4)
                .map(|p| {
                    let q = Arc::clone(&q);
                    s.spawn(move || {
                        let mut accepted = Vec::new();
                        let mut rejected = 0;
                        for i in 0..1_000 {
                            match q.push(p * 1_000 + i) {
                                Ok(()) => accepted.push(p * 1_000 + i),
                                Err(_) => rejected += 1,
                            }
                        }
                        (accepted, rejected)
                    })
                })
                .collect::<Vec<_>>();

            q.close();

            producers.into_iter().map(|h| h.join().unwrap()).fold(
                (HashSet::new(), 0),
                |(mut all, rej), (acc, r)| {
                    all.extend(acc);
                    (all, rej + r)
                },
            )
        });

        let queued = std::iter::from_fn(|| q.pop()).collect::<HashSet<_>>();
        assert_eq!(queued, accepted);
        assert_eq!(queued.len() + rejected, 4_000);
    }
}
