//! Per-thread bookkeeping of the execution slices currently running.
//!
//! An execution slice is entered only by a thread that holds the room's tick
//! lock. Room state is reachable exclusively through [`try_with_state`],
//! which checks that the calling thread is inside a slice of that room and
//! that the state is not already borrowed further up the stack.
//!
//! Slices nest: a task running in room A may post to room B and run B's task
//! inline on the fast path. Leaving a slice restores the previous entry.

use crate::task::RoomId;
use crate::utils::ScopeGuard;
use smallvec::SmallVec;
use std::cell::{RefCell, UnsafeCell};
use std::marker::PhantomData;

#[derive(Debug)]
struct Slice {
    room: RoomId,
    borrowed: bool,
}

thread_local! {
    static SLICES: RefCell<SmallVec<[Slice; 4]>> = RefCell::new(SmallVec::new());
}

/// Marks the current thread as executing inside `room` until dropped.
#[must_use]
pub(crate) struct SliceGuard {
    room: RoomId,

    // The slice belongs to the thread-local stack of this thread.
    _not_send: PhantomData<*const ()>,
}

/// # Panics
///
/// Panics if the thread is already inside a slice of `room`. The tick lock is
/// not reentrant, so this would mean two executions own the room at once.
pub(crate) fn enter_slice(room: RoomId) -> SliceGuard {
    SLICES.with_borrow_mut(|slices| {
        assert!(
            !slices.iter().any(|s| s.room == room),
            "FATAL: room {room} entered twice on the same thread"
        );
        slices.push(Slice {
            room,
            borrowed: false,
        });
    });

    SliceGuard {
        room,
        _not_send: PhantomData,
    }
}

impl Drop for SliceGuard {
    fn drop(&mut self) {
        SLICES.with_borrow_mut(|slices| {
            let top = slices.pop();
            debug_assert!(
                top.is_some_and(|s| s.room == self.room),
                "slices must be left in LIFO order"
            );
        });
    }
}

pub(crate) fn is_in_slice(room: RoomId) -> bool {
    SLICES.with_borrow(|slices| slices.iter().any(|s| s.room == room))
}

/// Number of nested slices on this thread.
#[cfg(test)]
pub(crate) fn depth() -> usize {
    SLICES.with_borrow(|slices| slices.len())
}

/// Runs `f` with exclusive access to the state of `room`.
///
/// Returns `None` if the current thread is not inside a slice of `room`, or if
/// the state of `room` is already borrowed on this thread.
pub(crate) fn try_with_state<S, T>(
    room: RoomId,
    cell: &UnsafeCell<S>,
    f: impl FnOnce(&mut S) -> T,
) -> Option<T> {
    let acquired = SLICES.with_borrow_mut(|slices| {
        match slices.iter_mut().rev().find(|s| s.room == room) {
            Some(slice) if !slice.borrowed => {
                slice.borrowed = true;
                true
            }
            _ => false,
        }
    });

    if !acquired {
        return None;
    }

    let _release = ScopeGuard::new(|| {
        SLICES.with_borrow_mut(|slices| {
            if let Some(slice) = slices.iter_mut().rev().find(|s| s.room == room) {
                slice.borrowed = false;
            }
        })
    });

    // Safety: being inside a slice of `room` means this thread holds the
    // room's tick lock, and the borrow flag rules out a second `&mut` on this
    // thread.
    let state = unsafe { &mut *cell.get() };
    Some(f(state))
}
