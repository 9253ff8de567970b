#![forbid(unsafe_code)]

//! Debounce combinators.
//!
//! [`Debounced`] collapses bursts of calls into one call made `delay` after
//! the last call of the burst, with that call's arguments. It runs on a
//! [`Scheduler`], so under a [`LabClock`](lumen_core::LabClock)-driven loop
//! its timing is fully deterministic.
//!
//! [`DebouncePolicy::min_repeats`] makes short bursts disappear: the delayed
//! call only happens when the burst had more than `min_repeats` calls.
//! [`DebouncePolicy::immediate`] turns the call that would push the burst past
//! `min_repeats` into an instant one instead of waiting for the timer.
//!
//! With the `async` feature, [`AsyncDebounced`] is the tokio counterpart for
//! async callbacks: every call aborts the pending task and spawns a new one.
//!
//! # Invariants
//!
//! 1. At most one delayed call is pending per combinator.
//! 2. A timer that was superseded never invokes the callback, even if it was
//!    already firing when the superseding call arrived; the superseding call
//!    schedules its own timer, so the final call of a burst is never lost.

use std::fmt;
use std::sync::{Arc, Weak};
use web_time::Duration;

use lumen_core::scheduler::{Scheduler, SharedScheduler, TimerHandle};
use parking_lot::Mutex;

/// Timing policy for [`Debounced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    delay: Duration,
    min_repeats: u32,
    immediate: bool,
}

impl DebouncePolicy {
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            min_repeats: 0,
            immediate: false,
        }
    }

    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Delayed calls only happen for bursts longer than `n` calls.
    #[must_use]
    pub const fn min_repeats(mut self, n: u32) -> Self {
        self.min_repeats = n;
        self
    }

    /// Once a burst has reached `min_repeats` calls, run the next call
    /// immediately and start counting again.
    #[must_use]
    pub const fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

struct State<A> {
    count: u32,
    latest: Option<A>,
    timer: Option<TimerHandle>,
    generation: u64,
}

struct Inner<A> {
    policy: DebouncePolicy,
    scheduler: SharedScheduler,
    callback: Box<dyn Fn(A) + Send + Sync>,
    state: Mutex<State<A>>,
}

impl<A: Send + 'static> Inner<A> {
    fn fire(self: Arc<Self>, generation: u64) {
        let args = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.timer = None;
            let count = std::mem::take(&mut state.count);
            let latest = state.latest.take();
            if count > self.policy.min_repeats {
                latest
            } else {
                tracing::trace!(count, min_repeats = self.policy.min_repeats, "debounced burst too short");
                None
            }
        };
        if let Some(args) = args {
            (self.callback)(args);
        }
    }
}

/// Trailing debounce over a callback taking `A`.
///
/// Cloning yields another handle to the same debouncer.
pub struct Debounced<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Debounced<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Debounced")
            .field("policy", &self.inner.policy)
            .field("count", &state.count)
            .field("pending", &state.timer.is_some())
            .finish()
    }
}

impl<A: Send + 'static> Debounced<A> {
    pub fn new(
        policy: DebouncePolicy,
        scheduler: impl Scheduler + 'static,
        callback: impl Fn(A) + Send + Sync + 'static,
    ) -> Self {
        Self::with_shared(policy, Arc::new(scheduler), callback)
    }

    pub fn with_shared(
        policy: DebouncePolicy,
        scheduler: SharedScheduler,
        callback: impl Fn(A) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                scheduler,
                callback: Box::new(callback),
                state: Mutex::new(State {
                    count: 0,
                    latest: None,
                    timer: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn call(&self, args: A) {
        let policy = self.inner.policy;
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.generation += 1;

        if !policy.immediate || state.count < policy.min_repeats {
            state.count += 1;
            state.latest = Some(args);
            let generation = state.generation;
            let weak: Weak<Inner<A>> = Arc::downgrade(&self.inner);
            let timer = self.inner.scheduler.schedule_delayed(
                policy.delay,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.fire(generation);
                    }
                }),
            );
            state.timer = Some(timer);
        } else {
            state.count = 0;
            state.latest = None;
            drop(state);
            (self.inner.callback)(args);
        }
    }

    /// Drop the pending call, if any.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.count = 0;
        state.latest = None;
        state.timer.take().is_some_and(|timer| timer.cancel())
    }

    /// Whether a delayed call is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }
}

// ─── Async ───────────────────────────────────────────────────────────────────

#[cfg(feature = "async")]
pub use self::tokio_impl::AsyncDebounced;

#[cfg(feature = "async")]
mod tokio_impl {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;
    use tokio::task::JoinHandle;

    type BoxedCall<A> = Arc<dyn Fn(A) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

    /// Trailing debounce for async callbacks on a tokio runtime.
    ///
    /// Each [`call`](Self::call) aborts the pending invocation and spawns a
    /// fresh one that sleeps for the delay first.
    pub struct AsyncDebounced<A> {
        delay: Duration,
        callback: BoxedCall<A>,
        pending: Arc<Mutex<Option<JoinHandle<()>>>>,
    }

    impl<A> Clone for AsyncDebounced<A> {
        fn clone(&self) -> Self {
            Self {
                delay: self.delay,
                callback: Arc::clone(&self.callback),
                pending: Arc::clone(&self.pending),
            }
        }
    }

    impl<A> std::fmt::Debug for AsyncDebounced<A> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("AsyncDebounced")
                .field("delay", &self.delay)
                .finish_non_exhaustive()
        }
    }

    impl<A: Send + 'static> AsyncDebounced<A> {
        pub fn new<F, Fut>(delay: Duration, callback: F) -> Self
        where
            F: Fn(A) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = ()> + Send + 'static,
        {
            Self {
                delay,
                callback: Arc::new(move |args: A| -> Pin<Box<dyn Future<Output = ()> + Send>> {
                    Box::pin(callback(args))
                }),
                pending: Arc::new(Mutex::new(None)),
            }
        }

        /// Supersede the pending invocation with one for `args`.
        ///
        /// Must be called from within a tokio runtime.
        pub async fn call(&self, args: A) {
            let mut pending = self.pending.lock().await;
            if let Some(previous) = pending.take() {
                previous.abort();
                if let Err(err) = previous.await {
                    if !err.is_cancelled() {
                        tracing::error!(error = %err, "debounced task failed");
                    }
                }
            }

            let callback = Arc::clone(&self.callback);
            let delay = self.delay;
            *pending = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                callback(args).await;
            }));
        }

        /// Abort the pending invocation, if any.
        pub async fn cancel(&self) {
            if let Some(previous) = self.pending.lock().await.take() {
                previous.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::clock::LabClock;
    use lumen_core::event_loop::MainLoop;
    use std::sync::Mutex as StdMutex;

    fn lab() -> (LabClock, MainLoop) {
        let clock = LabClock::new();
        let main_loop = MainLoop::with_lab_clock(&clock);
        (clock, main_loop)
    }

    fn recording(
        policy: DebouncePolicy,
        main_loop: &MainLoop,
    ) -> (Arc<StdMutex<Vec<u32>>>, Debounced<u32>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let debounced = Debounced::new(policy, main_loop.handle(), move |n| {
            sink.lock().unwrap().push(n);
        });
        (log, debounced)
    }

    #[test]
    fn single_call_fires_after_delay() {
        let (clock, main_loop) = lab();
        let (log, debounced) = recording(DebouncePolicy::from_millis(100), &main_loop);

        debounced.call(1);
        assert!(debounced.is_pending());
        clock.advance(Duration::from_millis(99));
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());

        clock.advance(Duration::from_millis(1));
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert!(!debounced.is_pending());
    }

    #[test]
    fn min_repeats_drops_short_bursts() {
        let (clock, main_loop) = lab();
        let (log, debounced) =
            recording(DebouncePolicy::from_millis(50).min_repeats(2), &main_loop);

        debounced.call(1);
        debounced.call(2);
        clock.advance(Duration::from_millis(50));
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());

        for n in 3..=5 {
            debounced.call(n);
        }
        clock.advance(Duration::from_millis(50));
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![5]);
    }

    #[test]
    fn immediate_fires_once_threshold_reached() {
        let (clock, main_loop) = lab();
        let (log, debounced) = recording(
            DebouncePolicy::from_millis(50).min_repeats(1).immediate(true),
            &main_loop,
        );

        debounced.call(1);
        assert!(log.lock().unwrap().is_empty());
        debounced.call(2);
        assert_eq!(*log.lock().unwrap(), vec![2]);
        assert!(!debounced.is_pending());

        clock.advance(Duration::from_millis(50));
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn cancel_drops_pending_call() {
        let (clock, main_loop) = lab();
        let (log, debounced) = recording(DebouncePolicy::from_millis(10), &main_loop);

        debounced.call(7);
        assert!(debounced.cancel());
        clock.advance(Duration::from_millis(10));
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn async_debounce_keeps_only_last_call() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let debounced = AsyncDebounced::new(Duration::from_millis(100), move |n: u32| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(n);
            }
        });

        for n in 1..=3 {
            debounced.call(n).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*log.lock().unwrap(), vec![3]);
    }

    #[cfg(feature = "async")]
    #[tokio::test(start_paused = true)]
    async fn async_cancel_drops_call() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let debounced = AsyncDebounced::new(Duration::from_millis(10), move |n: u32| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(n);
            }
        });

        debounced.call(1).await;
        debounced.cancel().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.lock().unwrap().is_empty());
    }
}
