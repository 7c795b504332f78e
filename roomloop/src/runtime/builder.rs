use crate::room::Room;
use crate::runtime::RoomScheduler;
use anyhow::{Result, ensure};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Default period of the background tick loop.
const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Smallest stack we accept for tick threads.
const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let tick_threads = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = tick_threads.fetch_add(1, Ordering::Relaxed);
        format!("roomloop-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and creates room schedulers and rooms.
///
/// ```
/// use std::time::Duration;
///
/// let scheduler = roomloop::Builder::new()
///     .name("lobby")
///     .tick_interval(Duration::from_millis(100))
///     .try_build(0u64)
///     .unwrap();
///
/// assert_eq!(scheduler.name(), Some("lobby"));
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Human readable room name, used in logs.
    name: Option<String>,

    /// Period of the background tick loop started by `Room::start`.
    tick_interval: Duration,

    /// Name fn used for tick threads.
    thread_name: ThreadNameFn,

    /// Stack size used for tick threads.
    thread_stack_size: Option<usize>,

    /// Whether a fast-path execution is followed by an opportunistic drain of
    /// the pending queue, before the submitting call returns.
    drain_after_fast_path: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            name: None,
            tick_interval: TICK_INTERVAL,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            drain_after_fast_path: false,
        }
    }

    pub fn name(mut self, val: impl Into<String>) -> Self {
        self.name = Some(val.into());
        self
    }

    /// Sets the period of the background tick loop.
    ///
    /// Defaults to 50ms. Ticks that are missed because a tick ran late are
    /// skipped, not replayed.
    #[track_caller]
    pub fn tick_interval(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "tick_interval must be greater than 0");
        self.tick_interval = val;
        self
    }

    /// Sets the name of the tick thread spawned by `Room::start`.
    ///
    /// The default name is "roomloop-{id}", where id is monotonically
    /// increasing.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of tick threads.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for tick threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies minimal stack size.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.thread_stack_size = Some(val);
        self
    }

    /// When set, every task executed on the fast path is followed by an
    /// attempt to drain the pending queue before the lock holder returns.
    ///
    /// Off by default: tasks queued while a fast-path task runs then wait for
    /// the next tick, or for the next submission that finds the room idle.
    pub fn drain_after_fast_path(mut self, val: bool) -> Self {
        self.drain_after_fast_path = val;
        self
    }

    /// Creates a scheduler owning `state`.
    pub fn try_build<R: Send + 'static>(self, state: R) -> Result<RoomScheduler<R>> {
        let cfg = SchedulerConfig::try_from(self)?;
        Ok(RoomScheduler::from_config(state, cfg))
    }

    /// Creates a room owning `state`. The tick loop is not started.
    pub fn try_build_room<R: Send + 'static>(self, state: R) -> Result<Room<R>> {
        self.try_build(state).map(Room::from_scheduler)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

// Export builder as a SchedulerConfig object owned by each scheduler.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfig {
    pub(crate) name: Option<String>,
    pub(crate) tick_interval: Duration,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) drain_after_fast_path: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            name: None,
            tick_interval: TICK_INTERVAL,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            drain_after_fast_path: false,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            ensure!(!name.is_empty(), "room name cannot be empty");
            ensure!(
                !name.contains('\0'),
                "room name cannot contain NUL bytes: {:?}",
                name
            );
        }

        if let Some(size) = self.thread_stack_size {
            ensure!(
                size >= MIN_THREAD_STACK_SIZE,
                "thread_stack_size ({}) must be at least {} bytes",
                size,
                MIN_THREAD_STACK_SIZE
            );
        }

        Ok(())
    }
}

impl TryFrom<Builder> for SchedulerConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let cfg = SchedulerConfig {
            name: builder.name,
            tick_interval: builder.tick_interval,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            drain_after_fast_path: builder.drain_after_fast_path,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use static_assertions::assert_impl_all;

    assert_impl_all!(SchedulerConfig: Send, Sync, Clone);
    assert_impl_all!(Builder: Send, Sync);

    #[test]
    fn test_defaults() -> Result<()> {
        let cfg = SchedulerConfig::try_from(Builder::new())?;

        assert_eq!(cfg.name, None);
        assert_eq!(cfg.tick_interval, TICK_INTERVAL);
        assert_eq!(cfg.thread_stack_size, None);
        assert!(!cfg.drain_after_fast_path);
        Ok(())
    }

    #[test]
    fn test_default_thread_names_increase() {
        let cfg = SchedulerConfig::default();

        assert_eq!((cfg.thread_name.0)(), "roomloop-0");
        assert_eq!((cfg.thread_name.0)(), "roomloop-1");
    }

    #[test]
    fn test_fixed_thread_name() -> Result<()> {
        let cfg = SchedulerConfig::try_from(Builder::new().thread_name("lobby-tick"))?;

        assert_eq!((cfg.thread_name.0)(), "lobby-tick");
        assert_eq!((cfg.thread_name.0)(), "lobby-tick");
        Ok(())
    }

    #[rstest]
    #[case::empty_name(Builder::new().name(""))]
    #[case::nul_in_name(Builder::new().name("lob\0by"))]
    #[case::tiny_stack(Builder::new().thread_stack_size(4096))]
    fn test_invalid_config_rejected(#[case] builder: Builder) {
        assert!(SchedulerConfig::try_from(builder).is_err());
    }

    #[test]
    #[should_panic(expected = "thread_stack_size must be a power of two")]
    fn test_stack_size_power_of_two() {
        let _ = Builder::new().thread_stack_size(100_000);
    }

    #[test]
    #[should_panic(expected = "tick_interval must be greater than 0")]
    fn test_zero_tick_interval() {
        let _ = Builder::new().tick_interval(Duration::ZERO);
    }
}
