use futures::channel::oneshot;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Dependency completed by a helper thread after `after`.
///
/// The waker of the awaiting task fires on that helper thread, so resumption
/// happens on a thread unrelated to the room.
pub(crate) fn delay(after: Duration) -> impl Future<Output = ()> + Send + 'static {
    let (tx, rx) = oneshot::channel::<()>();

    thread::spawn(move || {
        thread::sleep(after);
        let _ = tx.send(());
    });

    async move {
        let _ = rx.await;
    }
}

/// Counts executions that overlapped with another one.
#[derive(Debug, Default)]
pub(crate) struct OverlapDetector {
    active: AtomicUsize,
    overlaps: AtomicUsize,
    entered: AtomicUsize,
}

pub(crate) struct OverlapGuard<'a> {
    detector: &'a OverlapDetector,
}

impl OverlapDetector {
    pub(crate) fn enter(&self) -> OverlapGuard<'_> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        OverlapGuard { detector: self }
    }

    pub(crate) fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub(crate) fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl Drop for OverlapGuard<'_> {
    fn drop(&mut self) {
        self.detector.active.fetch_sub(1, Ordering::SeqCst);
    }
}
