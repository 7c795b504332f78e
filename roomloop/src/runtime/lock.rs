use parking_lot::RawMutex;
use parking_lot::lock_api::RawMutex as _;
use std::fmt;

/// Binary exclusive lock with no notion of an owner.
///
/// Acquisition and release are decoupled from any guard or thread identity:
///
/// - the lock is *not reentrant*, a thread that already holds it fails
///   [`try_lock`](Self::try_lock) exactly like any other thread would;
/// - any thread may release it, the release does not have to happen on the
///   thread that acquired it.
///
/// Backed by `parking_lot`'s raw mutex, so [`lock`](Self::lock) parks the
/// thread instead of spinning.
pub struct ExclusiveLock {
    raw: RawMutex,
    name: &'static str,
}

impl ExclusiveLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            raw: RawMutex::INIT,
            name,
        }
    }

    /// Attempts to acquire the lock without blocking.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    /// Blocks until the lock is acquired.
    pub fn lock(&self) {
        self.raw.lock();
    }

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The lock must be held, by a successful `try_lock` or `lock` that has
    /// not been paired with an `unlock` yet.
    pub unsafe fn unlock(&self) {
        // Safety: forwarded to the caller. The `send_guard` feature makes
        // releasing from a thread other than the acquiring one sound.
        unsafe { self.raw.unlock() };
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl fmt::Debug for ExclusiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    assert_impl_all!(ExclusiveLock: Send, Sync);

    #[test]
    fn test_not_reentrant() {
        let lock = ExclusiveLock::new("test");

        assert!(lock.try_lock());
        assert!(lock.is_locked());

        // Same thread, second attempt fails like any other thread would.
        assert!(!lock.try_lock());

        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn test_released_by_another_thread() {
        let lock = Arc::new(ExclusiveLock::new("test"));
        assert!(lock.try_lock());

        let remote = Arc::clone(&lock);
        thread::spawn(move || unsafe { remote.unlock() })
            .join()
            .unwrap();

        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }

    #[test]
    fn test_blocking_lock_waits_for_release() {
        let lock = Arc::new(ExclusiveLock::new("test"));
        let acquired = Arc::new(AtomicBool::new(false));
        lock.lock();

        let handle = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                lock.lock();
                acquired.store(true, Ordering::SeqCst);
                unsafe { lock.unlock() };
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));

        unsafe { lock.unlock() };
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
