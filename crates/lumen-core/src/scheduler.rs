#![forbid(unsafe_code)]

//! Scheduling seam between the reactive core and the event loop.
//!
//! Everything that defers work (deferred signal delivery, debounce timers,
//! cross-thread cell writes) goes through the [`Scheduler`] trait rather than a
//! concrete loop, so the core can be driven by [`MainLoop`](crate::event_loop::MainLoop)
//! or by any other loop that can run a boxed closure later.
//!
//! # Invariants
//!
//! 1. A task passed to `schedule_idle` runs at most once, on the loop thread.
//! 2. A delayed task runs at most once, never before its deadline, and never
//!    after its [`TimerHandle`] was cancelled.
//! 3. `TimerHandle::cancel` and the loop's "fire" step race through a single
//!    atomic state, so exactly one of them wins.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use web_time::Duration;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run closures later on its own thread.
pub trait Scheduler: Send + Sync {
    /// Queue `task` for the next loop turn.
    fn schedule_idle(&self, task: Task);

    /// Queue `task` to run once `delay` has elapsed.
    fn schedule_delayed(&self, delay: Duration, task: Task) -> TimerHandle;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule_idle(&self, task: Task) {
        (**self).schedule_idle(task);
    }

    fn schedule_delayed(&self, delay: Duration, task: Task) -> TimerHandle {
        (**self).schedule_delayed(delay, task)
    }
}

/// Shared, type-erased scheduler.
pub type SharedScheduler = Arc<dyn Scheduler>;

// ─── TimerHandle ─────────────────────────────────────────────────────────────

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Cancellable handle to a delayed task.
///
/// Cloning yields another handle to the same timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    /// Create a handle in the pending state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Cancel the timer.
    ///
    /// Returns `true` if this call prevented the task from running, `false`
    /// if it had already fired or been cancelled.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the timer for execution. Used by loop implementations right
    /// before running the task; returns `false` if the timer was cancelled.
    pub fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the timer was cancelled before it fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Whether the timer's task has been claimed for execution.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Whether the timer is still waiting for its deadline.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_wins_once() {
        let handle = TimerHandle::new();
        assert!(handle.is_pending());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
        assert!(!handle.try_fire());
    }

    #[test]
    fn fire_blocks_cancel() {
        let handle = TimerHandle::new();
        assert!(handle.try_fire());
        assert!(handle.has_fired());
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let a = TimerHandle::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }
}
