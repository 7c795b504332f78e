//! Rooms: a scheduler plus the tick loop driving it.

mod ticker;
use ticker::Ticker;

use crate::context;
use crate::runtime::{PendingQueue, RoomScheduler, TickGuard};
use crate::task::{RoomId, RoomTask, panic_payload_as_str};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Room state advanced by the background tick loop.
pub trait Simulation: Send + 'static {
    /// Advances the simulation by one tick. `game_time` is the number of the
    /// tick being run, starting at 1.
    fn tick(&mut self, game_time: u64);
}

/// A room: owns its [`RoomScheduler`] and drives its ticks.
///
/// Every tick holds the room's tick lock for its whole duration and runs, in
/// order:
///
/// 1. the update tasks registered with [`Room::schedule_update`] since the
///    previous tick;
/// 2. the simulation step;
/// 3. a drain of the tasks that were queued while the room was busy.
///
/// Dereferences to its scheduler, so tasks are submitted to the room
/// directly.
///
/// ```
/// use roomloop::Room;
///
/// let room = Room::new(Vec::<u64>::new());
/// room.schedule_update(|log| log.push(0));
///
/// room.tick_with(|log, game_time| log.push(game_time));
///
/// let mut log = room.schedule(|log| log.clone());
/// assert_eq!(log.try_take(), Some(Ok(vec![0, 1])));
/// assert_eq!(room.game_time(), 1);
/// ```
pub struct Room<R> {
    inner: Arc<RoomInner<R>>,
}

struct RoomInner<R> {
    scheduler: RoomScheduler<R>,

    /// Number of ticks started so far.
    game_time: AtomicU64,

    /// One-shot tasks run at the start of the next tick.
    updates: PendingQueue<RoomTask<R>>,

    tick_loop: Mutex<Option<TickLoop>>,
}

/// Background thread ticking a room.
struct TickLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TickLoop {
    /// Signals the thread to exit. Joins it unless that would deadlock.
    fn stop(self, room: RoomId) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();

        // The tick thread may be waiting for the tick lock held by the
        // caller, or be the caller.
        let on_tick_thread = thread::current().id() == self.handle.thread().id();
        if on_tick_thread || context::is_in_slice(room) {
            return;
        }

        if self.handle.join().is_err() {
            tracing::error!(%room, "tick thread panicked");
        }
    }
}

impl<R: Send + 'static> Room<R> {
    /// Creates a room with a default scheduler. The tick loop is not started.
    pub fn new(state: R) -> Self {
        Self::from_scheduler(RoomScheduler::new(state))
    }

    pub(crate) fn from_scheduler(scheduler: RoomScheduler<R>) -> Self {
        Self {
            inner: Arc::new(RoomInner {
                scheduler,
                game_time: AtomicU64::new(0),
                updates: PendingQueue::new(),
                tick_loop: Mutex::new(None),
            }),
        }
    }

    pub fn scheduler(&self) -> &RoomScheduler<R> {
        &self.inner.scheduler
    }

    /// Number of ticks started so far.
    pub fn game_time(&self) -> u64 {
        self.inner.game_time.load(Ordering::Acquire)
    }

    /// Whether a background tick loop is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .tick_loop
            .lock()
            .as_ref()
            .is_some_and(|tick_loop| !tick_loop.handle.is_finished())
    }

    /// Registers `f` to run at the start of the next tick, before the
    /// simulation step.
    ///
    /// Returns `false` once the room is shut down.
    pub fn schedule_update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        match self.inner.updates.push(RoomTask::sync_void(f)) {
            Ok(()) => true,
            Err(task) => {
                task.reject();
                false
            }
        }
    }

    /// Runs one tick on the calling thread, with `step` as the simulation
    /// step. Returns the game time of the tick.
    ///
    /// Blocks while a task of this room runs on another thread. A panic in
    /// `step` is propagated once the tick lock is released.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a task of this room.
    pub fn tick_with<F>(&self, step: F) -> u64
    where
        F: FnOnce(&mut R, u64),
    {
        let guard = self.inner.scheduler.lock_tick();
        let game_time = self.inner.game_time.fetch_add(1, Ordering::AcqRel) + 1;

        let span = tracing::trace_span!("tick", room = %self.room_id(), game_time);
        let _enter = span.enter();

        self.run_updates(&guard);
        guard.with_state(|state| step(state, game_time));
        guard.drain();

        game_time
    }

    fn run_updates(&self, guard: &TickGuard<'_, R>) {
        while let Some(update) = self.inner.updates.pop() {
            guard.execute(update);
        }
    }

    /// Stops the tick loop, then closes the scheduler.
    ///
    /// Every task and update accepted before the call runs exactly once
    /// before `shutdown` returns, unless it is called from inside a task of
    /// this room. In that case the tick loop and the scheduler only stop
    /// accepting work.
    pub fn shutdown(&self) {
        let room = self.room_id();

        if let Some(tick_loop) = self.inner.tick_loop.lock().take() {
            tick_loop.stop(room);
        }

        self.inner.updates.close();
        self.inner.scheduler.close();

        if context::is_in_slice(room) {
            return;
        }

        let guard = self.inner.scheduler.lock_tick();
        self.run_updates(&guard);

        tracing::debug!(%room, game_time = self.game_time(), "room shut down");
    }

    fn downgrade(&self) -> Weak<RoomInner<R>> {
        Arc::downgrade(&self.inner)
    }
}

impl<R: Simulation> Room<R> {
    /// Runs one tick on the calling thread. Returns the game time of the
    /// tick.
    pub fn tick(&self) -> u64 {
        self.tick_with(|state, game_time| state.tick(game_time))
    }

    /// Spawns the background thread ticking this room at the configured
    /// interval.
    ///
    /// The thread holds the room weakly and exits once the room is dropped
    /// or shut down. A panic in the simulation step is logged and the loop
    /// keeps going.
    pub fn start(&self) -> Result<()> {
        let mut tick_loop = self.inner.tick_loop.lock();

        anyhow::ensure!(
            tick_loop.is_none(),
            "tick loop of room {} is already running",
            self.room_id()
        );
        anyhow::ensure!(
            !self.is_closed(),
            "room {} is shut down",
            self.room_id()
        );

        let cfg = self.inner.scheduler.config();
        let interval = cfg.tick_interval;
        let stop = Arc::new(AtomicBool::new(false));

        let mut builder = thread::Builder::new().name((cfg.thread_name.0)());
        if let Some(stack_size) = cfg.thread_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder
            .spawn({
                let room = self.downgrade();
                let stop = Arc::clone(&stop);
                move || run_tick_loop(room, stop, interval)
            })
            .with_context(|| format!("failed to spawn tick thread of room {}", self.room_id()))?;

        tracing::debug!(room = %self.room_id(), ?interval, "tick loop started");
        *tick_loop = Some(TickLoop { stop, handle });

        Ok(())
    }
}

fn run_tick_loop<R: Simulation>(
    room: Weak<RoomInner<R>>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut ticker = Ticker::new(interval, Instant::now());

    while !stop.load(Ordering::Acquire) {
        let remaining = ticker.remaining(Instant::now());
        if !remaining.is_zero() {
            // Woken early by `shutdown`, or spuriously.
            thread::park_timeout(remaining);
            continue;
        }

        let skipped = ticker.advance(Instant::now());
        if skipped > 0 {
            tracing::warn!(skipped, "tick loop running late, skipping ticks");
        }

        let Some(inner) = room.upgrade() else {
            break;
        };
        let room = Room { inner };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| room.tick())) {
            tracing::error!(
                room = %room.room_id(),
                panic = panic_payload_as_str(&payload).unwrap_or("<non-string payload>"),
                "simulation step panicked"
            );
        }
    }

    tracing::debug!("tick loop stopped");
}

impl<R> Drop for RoomInner<R> {
    fn drop(&mut self) {
        if let Some(tick_loop) = self.tick_loop.get_mut().take() {
            tick_loop.stop.store(true, Ordering::Release);
            tick_loop.handle.thread().unpark();
        }
    }
}

impl<R> Deref for Room<R> {
    type Target = RoomScheduler<R>;

    fn deref(&self) -> &Self::Target {
        &self.inner.scheduler
    }
}

impl<R> Clone for Room<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for Room<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("scheduler", &self.inner.scheduler)
            .field("game_time", &self.inner.game_time.load(Ordering::Relaxed))
            .finish()
    }
}
