use std::marker::PhantomData;

/// Runs a closure when it goes out of scope, including during unwinding.
///
/// Used wherever a scheduler invariant must be restored no matter how an
/// execution slice ends, e.g. releasing a state borrow flag or a lock that
/// was acquired outside of a typed guard.
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // `Option` so the closure runs at most once, even if it panics on drop.
    closure: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    ///
    /// ```ignore
    /// let released = Cell::new(false);
    /// {
    ///     let _guard = ScopeGuard::new(|| released.set(true));
    ///     assert!(!released.get());
    /// }
    /// assert!(released.get());
    /// ```
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
            _p: PhantomData,
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic;

    #[test]
    fn test_guard_runs_on_scope_exit() {
        let hits = Cell::new(0);
        {
            let _guard = ScopeGuard::new(|| hits.set(hits.get() + 1));
            assert_eq!(hits.get(), 0);
        }
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_guard_runs_while_unwinding() {
        let hits = Cell::new(0);
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = ScopeGuard::new(|| hits.set(hits.get() + 1));
            panic!("boom");
        }));

        assert!(res.is_err());
        assert_eq!(hits.get(), 1);
    }
}
