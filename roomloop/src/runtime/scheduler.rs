use crate::context;
use crate::runtime::{ExclusiveLock, PendingQueue, SchedulerConfig};
use crate::task::{CancelToken, Completion, Dispatcher, RoomId, RoomTask};
use crate::utils::ScopeGuard;
use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

#[cfg(test)]
use crate::utils::tracker::{Call, Tracker};

/// Serializes every mutation of a room's state.
///
/// A room's state `R` is owned by its scheduler and only ever reached from an
/// *execution slice*: one run of a synchronous task, or one poll of an
/// asynchronous task, on a thread holding the room's tick lock. Any thread
/// may submit work at any time:
///
/// - **fast path**: if the tick lock is free, the task runs inline on the
///   submitting thread, and its result is available as soon as the
///   submitting call returns;
/// - **slow path**: otherwise the task is appended to the pending queue, and
///   the submitting thread tries to drain the queue itself. If the room is
///   busy, the current lock holder (normally the tick loop) runs it.
///
/// Async tasks are resumed inside the room too: their waker resubmits them
/// through the same two paths, from whichever thread completed the awaited
/// dependency.
///
/// ```
/// use roomloop::RoomScheduler;
///
/// let scheduler = RoomScheduler::new(0u32);
/// assert!(scheduler.post(|counter| *counter += 1));
///
/// let mut seen = scheduler.schedule(|counter| *counter);
/// assert_eq!(seen.try_take(), Some(Ok(1)));
/// ```
pub struct RoomScheduler<R> {
    shared: Arc<Shared<R>>,
}

pub(crate) struct Shared<R> {
    room: RoomId,

    cfg: SchedulerConfig,

    /// Only reached from a slice of `room`, see `context::try_with_state`.
    state: UnsafeCell<R>,

    /// Held by whoever executes tasks of this room.
    tick_lock: ExclusiveLock,

    /// Held by whoever drains `queue`.
    drain_lock: ExclusiveLock,

    queue: PendingQueue<RoomTask<R>>,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

// Safety: `state` is only accessed from a thread holding `tick_lock`.
unsafe impl<R: Send> Send for Shared<R> {}
unsafe impl<R: Send> Sync for Shared<R> {}

enum FastPath<R> {
    /// Executed inline.
    Ran,

    /// The room is busy, the task is handed back for queuing.
    Busy(RoomTask<R>),

    /// The room is closed.
    Closed(RoomTask<R>),
}

impl<R: Send + 'static> RoomScheduler<R> {
    /// Creates a scheduler with the default configuration.
    pub fn new(state: R) -> Self {
        Self::from_config(state, SchedulerConfig::default())
    }

    pub(crate) fn from_config(state: R, cfg: SchedulerConfig) -> Self {
        let room = RoomId::next();
        tracing::debug!(%room, name = cfg.name.as_deref(), "room scheduler created");

        Self {
            shared: Arc::new(Shared {
                room,
                cfg,
                state: UnsafeCell::new(state),
                tick_lock: ExclusiveLock::new("tick"),
                drain_lock: ExclusiveLock::new("drain"),
                queue: PendingQueue::new(),
                #[cfg(test)]
                tracker: Tracker::new(),
            }),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.shared.room
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.cfg.name.as_deref()
    }

    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.shared.cfg
    }

    /// Submits a fire-and-forget synchronous task.
    ///
    /// Returns `false` only if the scheduler is closed. A panic in `f` is
    /// caught and logged.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut R) + Send + 'static,
    {
        self.shared.submit(RoomTask::sync_void(f))
    }

    /// Submits a synchronous task producing a value.
    pub fn schedule<F, T>(&self, f: F) -> Completion<T>
    where
        F: FnOnce(&mut R) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, completion) = RoomTask::sync_value(f);
        self.submit_with_completion(task, completion)
    }

    /// Submits an asynchronous task. The completion resolves once the future
    /// returned by `f` has run to completion.
    ///
    /// Every poll of the future is an execution slice of this room, including
    /// the polls that follow a wake from another thread.
    pub fn post_async<F, Fut>(&self, f: F) -> Completion<()>
    where
        F: FnOnce(RoomCx<R>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (task, completion) = RoomTask::async_void(self.dispatcher(), f);
        self.submit_with_completion(task, completion)
    }

    /// Submits an asynchronous task producing a value.
    pub fn schedule_async<F, Fut, T>(&self, f: F) -> Completion<T>
    where
        F: FnOnce(RoomCx<R>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, completion) = RoomTask::async_value(self.dispatcher(), None, f);
        self.submit_with_completion(task, completion)
    }

    /// Like [`schedule_async`](Self::schedule_async), but stops at the first
    /// resumption after `token` is cancelled, resolving to
    /// `TaskError::Cancelled`.
    ///
    /// The first slice always runs, even when `token` is already cancelled.
    pub fn schedule_async_cancellable<F, Fut, T>(&self, token: &CancelToken, f: F) -> Completion<T>
    where
        F: FnOnce(RoomCx<R>) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, completion) = RoomTask::async_value(self.dispatcher(), Some(token.clone()), f);
        self.submit_with_completion(task, completion)
    }

    fn submit_with_completion<T>(&self, task: RoomTask<R>, completion: Completion<T>) -> Completion<T> {
        if self.shared.submit(task) {
            completion
        } else {
            Completion::unavailable()
        }
    }

    fn dispatcher(&self) -> Dispatcher<R> {
        Dispatcher::new(Arc::downgrade(&self.shared), self.shared.room)
    }

    /// Acquires the tick lock, blocking until every in-flight execution of
    /// this room is done.
    ///
    /// This is the entry point of the tick loop: the returned guard grants
    /// access to the state and drains the pending queue.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a task of this room, which would never
    /// return.
    #[track_caller]
    pub fn lock_tick(&self) -> TickGuard<'_, R> {
        assert!(
            !context::is_in_slice(self.shared.room),
            "lock_tick called from inside a task of room {}",
            self.shared.room
        );

        self.shared.tick_lock.lock();
        TickGuard::new(&self.shared)
    }

    /// Acquires the tick lock if it is free.
    pub fn try_lock_tick(&self) -> Option<TickGuard<'_, R>> {
        self.shared
            .tick_lock
            .try_lock()
            .then(|| TickGuard::new(&self.shared))
    }

    /// Stops accepting tasks, then runs every task accepted so far.
    ///
    /// Blocks until the room is idle. When called from inside a task of this
    /// room, only stops accepting tasks: the queued ones run on the next
    /// drain performed by the tick loop.
    ///
    /// Suspended async tasks woken after `close` never resume, their
    /// completion resolves to `TaskError::Unavailable`.
    pub fn close(&self) {
        if !self.shared.queue.close() {
            return;
        }

        tracing::debug!(
            room = %self.shared.room,
            pending = self.shared.queue.len(),
            "room scheduler closed"
        );

        if context::is_in_slice(self.shared.room) {
            return;
        }

        self.lock_tick().drain();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Whether the tick lock is held, by a tick or by a task running
    /// inline.
    pub fn is_ticking(&self) -> bool {
        self.shared.tick_lock.is_locked()
    }

    /// Number of tasks waiting in the pending queue.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &Tracker {
        &self.shared.tracker
    }
}

impl<R: Send + 'static> Shared<R> {
    /// Submits `task` through the fast path, or the slow path if the room is
    /// busy. Returns `false` if the task was rejected.
    pub(crate) fn submit(&self, task: RoomTask<R>) -> bool {
        let task = match self.try_fast_path(task) {
            FastPath::Ran => {
                if self.cfg.drain_after_fast_path {
                    self.try_drain();
                }
                return true;
            }
            FastPath::Closed(task) => {
                self.reject(task);
                return false;
            }
            FastPath::Busy(task) => task,
        };

        #[cfg(test)]
        let call = Call::Enqueue {
            kind: task.kind(),
            resume: task.is_resume(),
        };

        match self.queue.push(task) {
            Ok(()) => {
                #[cfg(test)]
                self.tracker.record(call);

                tracing::trace!(room = %self.room, "task enqueued");
                self.try_drain();
                true
            }
            Err(task) => {
                self.reject(task);
                false
            }
        }
    }

    fn try_fast_path(&self, task: RoomTask<R>) -> FastPath<R> {
        if !self.tick_lock.try_lock() {
            return FastPath::Busy(task);
        }

        // Safety: acquired above.
        let _unlock = ScopeGuard::new(|| unsafe { self.tick_lock.unlock() });

        if self.queue.is_closed() {
            return FastPath::Closed(task);
        }

        #[cfg(test)]
        self.tracker.record(Call::FastPath {
            kind: task.kind(),
            resume: task.is_resume(),
        });

        self.execute(task);
        FastPath::Ran
    }

    /// Drains the queue if both locks are free.
    ///
    /// Gives up as soon as one of the locks is held: an in-progress drain
    /// runs until the queue is empty, and the tick loop drains after every
    /// tick. The queue is checked again after releasing both locks, so a
    /// task pushed right before the release is not left behind.
    fn try_drain(&self) {
        loop {
            if !self.drain_lock.try_lock() {
                return;
            }

            if !self.tick_lock.try_lock() {
                // Safety: acquired above.
                unsafe { self.drain_lock.unlock() };
                return;
            }

            {
                // Safety: both acquired above.
                let _unlock = ScopeGuard::new(|| unsafe {
                    self.tick_lock.unlock();
                    self.drain_lock.unlock();
                });

                self.drain_queue();
            }

            if self.queue.is_empty() {
                return;
            }
        }
    }

    /// Runs queued tasks in FIFO order until the queue is empty.
    ///
    /// Caller holds both locks.
    fn drain_queue(&self) -> usize {
        let span = tracing::debug_span!("drain", room = %self.room);
        let _enter = span.enter();

        let mut executed = 0;
        while let Some(task) = self.queue.pop() {
            self.execute(task);
            executed += 1;
        }

        #[cfg(test)]
        self.tracker.record(Call::Drain { executed });

        if executed > 0 {
            tracing::debug!(executed, "pending queue drained");
        }

        executed
    }

    /// Runs one slice of `task`. Caller holds the tick lock.
    fn execute(&self, task: RoomTask<R>) {
        let _slice = context::enter_slice(self.room);
        task.execute(self.room, &self.state);
    }

    fn reject(&self, task: RoomTask<R>) {
        #[cfg(test)]
        self.tracker.record(Call::Reject { kind: task.kind() });

        task.reject();
    }
}

impl<R> Drop for Shared<R> {
    fn drop(&mut self) {
        // Only reachable once the room was dropped without being closed.
        while let Some(task) = self.queue.pop() {
            task.reject();
        }
    }
}

impl<R> Clone for RoomScheduler<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R> fmt::Debug for RoomScheduler<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomScheduler")
            .field("room", &self.shared.room)
            .field("name", &self.shared.cfg.name)
            .field("tick_lock", &self.shared.tick_lock)
            .field("queue", &self.shared.queue)
            .finish()
    }
}

/// Proof of holding a room's tick lock. Releases it on drop.
///
/// While the guard is alive no task of the room runs anywhere else: new
/// submissions are queued, and run when the guard holder calls
/// [`drain`](Self::drain).
#[must_use = "the tick lock is released as soon as the guard is dropped"]
pub struct TickGuard<'a, R> {
    shared: &'a Shared<R>,

    // Slices entered through this guard are bound to this thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a, R: Send + 'static> TickGuard<'a, R> {
    fn new(shared: &'a Shared<R>) -> Self {
        Self {
            shared,
            _not_send: PhantomData,
        }
    }

    /// Runs `f` with exclusive access to the room state, as one execution
    /// slice.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a slice of this room.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        let _slice = context::enter_slice(self.shared.room);

        match context::try_with_state(self.shared.room, &self.shared.state, f) {
            Some(val) => val,
            None => unreachable!("state of a freshly entered slice is never borrowed"),
        }
    }

    /// Runs every queued task, in FIFO order, until the queue is empty.
    /// Returns the number of slices executed.
    ///
    /// Waits for an opportunistic drain that may be winding down on another
    /// thread.
    pub fn drain(&self) -> usize {
        self.shared.drain_lock.lock();

        // Safety: acquired above.
        let _unlock = ScopeGuard::new(|| unsafe { self.shared.drain_lock.unlock() });

        self.shared.drain_queue()
    }

    /// Runs one slice of `task` under this guard.
    pub(crate) fn execute(&self, task: RoomTask<R>) {
        self.shared.execute(task);
    }
}

impl<R> Drop for TickGuard<'_, R> {
    fn drop(&mut self) {
        // Safety: a guard is only created after acquiring the lock.
        unsafe { self.shared.tick_lock.unlock() };
    }
}

impl<R> fmt::Debug for TickGuard<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickGuard")
            .field("room", &self.shared.room)
            .finish()
    }
}

/// Handle given to async tasks to reach their room.
///
/// State access through [`with`](Self::with) is only granted while the task
/// is being polled, that is inside one of its execution slices. It must not
/// be held across an `.await`: the closure form makes that impossible.
pub struct RoomCx<R> {
    shared: Weak<Shared<R>>,
    room: RoomId,
}

impl<R: Send + 'static> RoomCx<R> {
    pub(crate) fn new(shared: Weak<Shared<R>>, room: RoomId) -> Self {
        Self { shared, room }
    }

    pub fn room_id(&self) -> RoomId {
        self.room
    }

    /// Runs `f` with exclusive access to the room state.
    ///
    /// Returns `None` when called outside of an execution slice of the room,
    /// from a nested `with`, or once the room is gone.
    pub fn try_with<T>(&self, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        let shared = self.shared.upgrade()?;
        context::try_with_state(self.room, &shared.state, f)
    }

    /// Runs `f` with exclusive access to the room state.
    ///
    /// # Panics
    ///
    /// Panics where [`try_with`](Self::try_with) returns `None`.
    #[track_caller]
    pub fn with<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        match self.try_with(f) {
            Some(val) => val,
            None => panic!(
                "state of room {} accessed outside of one of its execution slices",
                self.room
            ),
        }
    }

    /// Handle to the scheduler of this room, if it is still alive.
    pub fn scheduler(&self) -> Option<RoomScheduler<R>> {
        self.shared.upgrade().map(|shared| RoomScheduler { shared })
    }
}

impl<R> Clone for RoomCx<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            room: self.room,
        }
    }
}

impl<R> fmt::Debug for RoomCx<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomCx").field("room", &self.room).finish()
    }
}
