use futures::task::ArcWake;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::Waker;

#[derive(Debug, Default)]
pub(crate) struct WakeCounter {
    count: AtomicUsize,
}

impl WakeCounter {
    pub(crate) fn get_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl ArcWake for WakeCounter {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Waker that only counts how many times it was woken.
pub(crate) fn counting_waker() -> (Waker, Arc<WakeCounter>) {
    let counter = Arc::new(WakeCounter::default());
    (futures::task::waker(Arc::clone(&counter)), counter)
}
