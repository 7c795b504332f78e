use std::sync::Once;
use tracing_subscriber::EnvFilter;

// Exports
pub(crate) mod future;
pub(crate) use future::{OverlapDetector, delay};

pub(crate) mod mocks;
pub(crate) use mocks::counting_waker;

/// Installs a test subscriber once per test binary. Filter with `RUST_LOG`.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,roomloop=warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}
