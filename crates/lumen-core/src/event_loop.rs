#![forbid(unsafe_code)]

//! Single-threaded cooperative event loop.
//!
//! [`MainLoop`] is the execution context the reactive core assumes: UI
//! callbacks, timer callbacks, and deferred notifications all run on the
//! thread that drives it. Other threads never touch loop state directly; they
//! hold a [`LoopHandle`] and post closures, which is how background workers
//! marshal cell writes back onto the loop.
//!
//! # Turn Structure
//!
//! One call to [`MainLoop::iterate`] is one turn:
//!
//! 1. Run every idle task that was queued **before** the turn started, in
//!    FIFO order. Tasks queued while the turn runs wait for the next turn, so
//!    a notification scheduled from inside a notification is delivered one
//!    tick later rather than recursively.
//! 2. Fire every uncancelled timer whose deadline is at or before "now",
//!    ordered by deadline, then by scheduling order.
//!
//! # Invariants
//!
//! 1. Tasks never run while the loop's internal lock is held, so a task may
//!    freely schedule more work.
//! 2. A timer fires at most once and never before its deadline.
//! 3. Time is read from the loop's [`TimeSource`]; with a [`LabClock`] nothing
//!    becomes due until the clock is advanced.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use lumen_core::clock::LabClock;
//! use lumen_core::event_loop::MainLoop;
//! use lumen_core::scheduler::Scheduler;
//! use web_time::Duration;
//!
//! let clock = LabClock::new();
//! let main_loop = MainLoop::with_lab_clock(&clock);
//! let handle = main_loop.handle();
//! let hits = Arc::new(AtomicU32::new(0));
//!
//! let h = Arc::clone(&hits);
//! handle.schedule_delayed(Duration::from_millis(100), Box::new(move || {
//!     h.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! main_loop.run_until_idle();
//! assert_eq!(hits.load(Ordering::SeqCst), 0);
//!
//! clock.advance(Duration::from_millis(100));
//! main_loop.run_until_idle();
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```
//!
//! [`LabClock`]: crate::clock::LabClock

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use web_time::{Duration, Instant};

use crate::clock::{LabClock, TimeSource};
use crate::scheduler::{Scheduler, Task, TimerHandle};

/// How long `run()` sleeps between polls when driven by a lab clock.
const LAB_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Smallest heap that is ever swept for cancelled timers.
const MIN_COMPACT_AT: usize = 64;

// ─── Timer queue ─────────────────────────────────────────────────────────────

struct Timer {
    deadline: Instant,
    seq: u64,
    handle: TimerHandle,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed: BinaryHeap is a max-heap, the earliest deadline must pop first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queues {
    idle: VecDeque<Task>,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
    /// Heap size above which cancelled timers are swept out.
    compact_at: usize,
    quit: bool,
}

impl Queues {
    /// Drop cancelled timers: eagerly at the head, and from the whole heap
    /// once it has grown past `compact_at`.
    fn prune_cancelled(&mut self) {
        while self.timers.peek().is_some_and(|timer| timer.handle.is_cancelled()) {
            self.timers.pop();
        }
        if self.timers.len() > self.compact_at.max(MIN_COMPACT_AT) {
            self.timers.retain(|timer| !timer.handle.is_cancelled());
            self.compact_at = self.timers.len() * 2;
        }
    }
}

struct Shared {
    queues: Mutex<Queues>,
    wake: Condvar,
    time: TimeSource,
    owner: ThreadId,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queues> {
        // Tasks never run under this lock, so poisoning can only come from a
        // panic inside the loop's own bookkeeping; the queues stay usable.
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── MainLoop ────────────────────────────────────────────────────────────────

/// The loop itself. Owned by the thread that drives it.
pub struct MainLoop {
    shared: Arc<Shared>,
}

impl MainLoop {
    /// Create a loop on the current thread using wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::Real)
    }

    /// Create a loop whose timers follow `clock`.
    #[must_use]
    pub fn with_lab_clock(clock: &LabClock) -> Self {
        Self::with_time_source(TimeSource::Lab(clock.clone()))
    }

    /// Create a loop with an explicit time source.
    #[must_use]
    pub fn with_time_source(time: TimeSource) -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(Queues::default()),
                wake: Condvar::new(),
                time,
                owner: thread::current().id(),
            }),
        }
    }

    /// A cloneable, thread-safe handle for scheduling work on this loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether the caller is on the thread that created this loop.
    #[must_use]
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Current time according to the loop's time source.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.shared.time.now()
    }

    /// Run one turn. Returns the number of tasks executed.
    pub fn iterate(&self) -> usize {
        let idle: Vec<Task> = self.shared.lock().idle.drain(..).collect();
        let mut ran = idle.len();
        for task in idle {
            task();
        }

        let now = self.shared.time.now();
        let mut due = Vec::new();
        {
            let mut queues = self.shared.lock();
            while queues
                .timers
                .peek()
                .is_some_and(|timer| timer.deadline <= now)
            {
                if let Some(timer) = queues.timers.pop() {
                    due.push(timer);
                }
            }
        }
        for timer in due {
            if timer.handle.try_fire() {
                (timer.task)();
                ran += 1;
            }
        }
        ran
    }

    /// Run turns until a turn executes nothing.
    ///
    /// Does not advance a lab clock and does not wait for future timers. A
    /// task that reschedules itself on every turn keeps this call spinning.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.iterate();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Run until [`LoopHandle::quit`] is called, sleeping while there is
    /// nothing to do.
    pub fn run(&self) {
        tracing::debug!("main loop started");
        loop {
            self.iterate();

            let mut queues = self.shared.lock();
            if queues.quit {
                queues.quit = false;
                tracing::debug!("main loop quit");
                return;
            }
            if !queues.idle.is_empty() {
                continue;
            }

            let now = self.shared.time.now();
            let wait = queues
                .timers
                .peek()
                .map(|timer| timer.deadline.saturating_duration_since(now));
            match (wait, self.shared.time.is_lab()) {
                (Some(d), _) if d.is_zero() => continue,
                (_, true) => {
                    drop(
                        self.shared
                            .wake
                            .wait_timeout(queues, LAB_POLL_INTERVAL)
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                }
                (Some(d), false) => {
                    drop(
                        self.shared
                            .wake
                            .wait_timeout(queues, d)
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                }
                (None, false) => {
                    drop(
                        self.shared
                            .wake
                            .wait(queues)
                            .unwrap_or_else(PoisonError::into_inner),
                    );
                }
            }
        }
    }

    /// Number of idle tasks waiting for the next turn.
    #[must_use]
    pub fn pending_idle(&self) -> usize {
        self.shared.lock().idle.len()
    }

    /// Number of timers that are neither fired nor cancelled.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.shared
            .lock()
            .timers
            .iter()
            .filter(|timer| timer.handle.is_pending())
            .count()
    }

    /// Deadline of the earliest pending timer, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.shared
            .lock()
            .timers
            .iter()
            .filter(|timer| timer.handle.is_pending())
            .map(|timer| timer.deadline)
            .min()
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.shared.lock();
        f.debug_struct("MainLoop")
            .field("idle", &queues.idle.len())
            .field("timers", &queues.timers.len())
            .field("lab", &self.shared.time.is_lab())
            .finish()
    }
}

// ─── LoopHandle ──────────────────────────────────────────────────────────────

/// Thread-safe handle to a [`MainLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    /// Ask the loop to return from [`MainLoop::run`] after the current turn.
    pub fn quit(&self) {
        self.shared.lock().quit = true;
        self.shared.wake.notify_all();
    }

    /// Whether the caller is on the loop's thread.
    #[must_use]
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Current time according to the loop's time source.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.shared.time.now()
    }
}

impl Scheduler for LoopHandle {
    fn schedule_idle(&self, task: Task) {
        self.shared.lock().idle.push_back(task);
        self.shared.wake.notify_one();
    }

    fn schedule_delayed(&self, delay: Duration, task: Task) -> TimerHandle {
        let handle = TimerHandle::new();
        let deadline = self.shared.time.now() + delay;
        {
            let mut queues = self.shared.lock();
            queues.prune_cancelled();
            let seq = queues.next_seq;
            queues.next_seq += 1;
            queues.timers.push(Timer {
                deadline,
                seq,
                handle: handle.clone(),
                task,
            });
        }
        self.shared.wake.notify_one();
        handle
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("owner", &self.shared.owner)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
