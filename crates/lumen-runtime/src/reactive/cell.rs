#![forbid(unsafe_code)]

//! Observable cell.
//!
//! A [`Ref`] holds one [`Payload`] and notifies watchers on the next loop turn
//! whenever a write actually changes it. Cloning a `Ref` yields another handle
//! to the same cell.
//!
//! # Invariants
//!
//! 1. A write equal to the current value is a no-op: no version bump, no
//!    notification.
//! 2. A write that violates the cell's type invariant fails with
//!    [`RefError::TypeInvariantViolation`] and leaves the value untouched.
//! 3. A cell built with `delayed_init(true)` never notifies before
//!    [`ready`](Ref::ready).
//! 4. While a [`Transaction`](super::Transaction) is open, writes from other
//!    threads block, and the cell's watchers hear about the batch once, when
//!    the outermost transaction ends.
//!
//! # Failure Modes
//!
//! - **Stale read**: [`get`](Ref::get) on a cell that is not ready logs a
//!   warning and still returns the value.
//! - **Re-entrant write from [`with`](Ref::with)**: the closure runs under the
//!   value's read lock; writing the same cell from it deadlocks. Use
//!   [`update`](Ref::update) for read-modify-write.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lumen_core::scheduler::{Scheduler, SharedScheduler};
use parking_lot::{ReentrantMutex, RwLock};

use super::payload::{Payload, ValueKind};
use crate::error::{HandlerError, RefError};
use crate::signals::{Delivery, HandlerId, Signals, WatchOptions};

/// Signal name every cell notifies on.
pub const CHANGED: &str = "changed";

// ─── Shared state ────────────────────────────────────────────────────────────

pub(crate) struct RefInner<T> {
    pub(crate) name: String,
    value: RwLock<T>,
    ready: AtomicBool,
    pub(crate) deep: bool,
    types: Option<Vec<ValueKind>>,
    item_types: Option<Vec<ValueKind>>,
    version: AtomicU64,
    signals: Signals<T>,
    /// Transaction depth on the thread currently holding the lock.
    pub(crate) tx: ReentrantMutex<Cell<usize>>,
}

impl<T: Payload> RefInner<T> {
    fn check_kind(&self, old: &T, new: &T) -> Result<(), RefError> {
        let Some(found) = new.payload_kind() else {
            return Ok(());
        };
        let expected = match &self.types {
            Some(declared) if !declared.contains(&found) => declared.clone(),
            Some(_) => return Ok(()),
            None if T::DYNAMIC => match old.payload_kind() {
                Some(previous) if previous != found => vec![previous],
                _ => return Ok(()),
            },
            None => return Ok(()),
        };
        Err(RefError::TypeInvariantViolation {
            name: self.name.clone(),
            expected,
            found,
        })
    }

    pub(crate) fn check_item<I: Payload>(&self, item: &I) -> Result<(), RefError> {
        let (Some(declared), Some(found)) = (&self.item_types, item.payload_kind()) else {
            return Ok(());
        };
        if declared.contains(&found) {
            return Ok(());
        }
        Err(RefError::TypeInvariantViolation {
            name: self.name.clone(),
            expected: declared.clone(),
            found,
        })
    }

    fn replace(&self, new: T) -> Result<bool, RefError> {
        let depth = {
            let depth = self.tx.lock();
            let mut value = self.value.write();
            if *value == new {
                return Ok(false);
            }
            self.check_kind(&value, &new)?;
            *value = new;
            self.version.fetch_add(1, Ordering::AcqRel);
            depth.get()
        };
        self.committed(depth);
        Ok(true)
    }

    /// Apply an in-place change. `edit` reports whether the value changed.
    pub(crate) fn mutate<R>(
        &self,
        edit: impl FnOnce(&mut T) -> Result<(R, bool), RefError>,
    ) -> Result<R, RefError> {
        let (result, depth) = {
            let depth = self.tx.lock();
            let mut value = self.value.write();
            let (result, changed) = edit(&mut *value)?;
            if !changed {
                return Ok(result);
            }
            self.version.fetch_add(1, Ordering::AcqRel);
            (result, depth.get())
        };
        self.committed(depth);
        Ok(result)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.value.read())
    }

    /// Called after the transaction lock is released; `trigger` takes the
    /// bus lock, which a dispatching watcher holds while it writes this cell.
    fn committed(&self, depth: usize) {
        if depth == 0 {
            self.trigger();
        } else {
            tracing::trace!(name = %self.name, depth, "change held by open transaction");
        }
    }

    /// Queue a "changed" delivery with the current value.
    pub(crate) fn trigger(&self) {
        if !self.ready.load(Ordering::Acquire) || self.signals.is_blocked(CHANGED) {
            return;
        }
        let snapshot = self.value.read().clone();
        self.signals.notify(CHANGED, snapshot);
    }
}

// ─── Ref ─────────────────────────────────────────────────────────────────────

/// Observable mutable value holder.
pub struct Ref<T> {
    pub(crate) inner: Arc<RefInner<T>>,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.read())
            .field("ready", &self.inner.ready.load(Ordering::Acquire))
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: Payload> Ref<T> {
    /// Create a ready, unnamed cell.
    pub fn new(initial: T, scheduler: impl Scheduler + 'static) -> Self {
        Self::builder(initial).build(scheduler)
    }

    #[must_use]
    pub fn builder(initial: T) -> RefBuilder<T> {
        RefBuilder {
            initial,
            name: None,
            delayed_init: false,
            deep: false,
            types: None,
            item_types: None,
        }
    }

    /// Build a cell that follows `source` through `transform`.
    ///
    /// The cell starts at `transform(source)` and is kept in sync until it is
    /// dropped; the binding does not keep it alive.
    pub fn derived<S: Payload>(
        name: &str,
        source: &Ref<S>,
        transform: impl Fn(&S) -> T + Send + Sync + 'static,
    ) -> Self {
        let initial = source.inner.read(&transform);
        let cell = Self::builder(initial)
            .name(name)
            .build_shared(Arc::clone(source.inner.signals.scheduler()));
        cell.bind(source, transform);
        cell
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current value. Logs a warning when the cell is not ready yet.
    #[must_use]
    pub fn get(&self) -> T {
        if !self.is_ready() {
            tracing::warn!(name = %self.inner.name, "reading ref before it is ready");
        }
        self.inner.read(T::clone)
    }

    /// Borrow the current value for the duration of `f`.
    ///
    /// `f` must not write this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.read(f)
    }

    /// Plain copy of the value, without the readiness diagnostic.
    #[must_use]
    pub fn unpack(&self) -> T {
        self.inner.read(T::clone)
    }

    /// Write a new value. Returns whether it differed from the old one.
    pub fn set(&self, value: T) -> Result<bool, RefError> {
        self.inner.replace(value)
    }

    /// Read-modify-write through a clone of the current value.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<bool, RefError> {
        let mut next = self.unpack();
        f(&mut next);
        self.set(next)
    }

    /// Write from any thread by routing the write through the loop.
    pub fn post(&self, value: T) {
        let inner = Arc::downgrade(&self.inner);
        self.inner
            .signals
            .scheduler()
            .schedule_idle(Box::new(move || {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if let Err(err) = inner.replace(value) {
                    tracing::error!(name = %inner.name, error = %err, "posted write rejected");
                }
            }));
    }

    /// Mark the cell ready. Idempotent; does not notify.
    pub fn ready(&self) {
        if !self.inner.ready.swap(true, Ordering::AcqRel) {
            tracing::debug!(name = %self.inner.name, "ref ready");
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_deep(&self) -> bool {
        self.inner.deep
    }

    /// Committed changes since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn watch(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> HandlerId {
        self.watch_with(WatchOptions::default(), callback)
    }

    pub fn watch_with(
        &self,
        options: WatchOptions,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.inner.signals.watch_with(CHANGED, options, callback);
        tracing::debug!(name = %self.inner.name, handler = %id, "watching ref");
        id
    }

    /// Watch on behalf of `subscriber` without keeping it alive.
    pub fn watch_weak<S: Send + Sync + 'static>(
        &self,
        options: WatchOptions,
        subscriber: &Arc<S>,
        callback: impl Fn(&S, &T) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner
            .signals
            .watch_weak(CHANGED, options, subscriber, callback)
    }

    pub fn unwatch(&self, id: HandlerId) -> bool {
        let removed = self.inner.signals.unwatch(id);
        if removed {
            tracing::debug!(name = %self.inner.name, handler = %id, "unwatched ref");
        }
        removed
    }

    /// Handler ids watching this cell, in dispatch order.
    #[must_use]
    pub fn handlers(&self) -> Vec<HandlerId> {
        self.inner.signals.handlers(CHANGED)
    }

    /// Stop notifying until [`unblock`](Self::unblock). Writes still apply.
    pub fn block(&self) {
        self.inner.signals.block(CHANGED);
    }

    pub fn unblock(&self) {
        self.inner.signals.unblock(CHANGED);
    }

    /// Keep this cell equal to `transform(source)` whenever `source` changes.
    ///
    /// The binding holds this cell weakly and is pruned once it is dropped. A
    /// transform result that breaks this cell's type invariant removes the
    /// binding and is logged.
    pub fn bind<S: Payload>(
        &self,
        source: &Ref<S>,
        transform: impl Fn(&S) -> T + Send + Sync + 'static,
    ) -> HandlerId {
        let target: Weak<RefInner<T>> = Arc::downgrade(&self.inner);
        let id = source.inner.signals.watch_raw(
            CHANGED,
            WatchOptions::default(),
            move |value: &S| -> Result<Delivery, HandlerError> {
                let Some(target) = target.upgrade() else {
                    return Ok(Delivery::Dead);
                };
                target.replace(transform(value))?;
                Ok(Delivery::Delivered)
            },
        );
        tracing::debug!(name = %self.inner.name, source = %source.inner.name, handler = %id, "bound ref");
        id
    }

    pub fn unbind<S: Payload>(&self, source: &Ref<S>, id: HandlerId) -> bool {
        source.unwatch(id)
    }

    /// Deliver the current value to watchers now, bypassing the queue.
    pub fn notify_now(&self) {
        if !self.is_ready() {
            return;
        }
        let snapshot = self.unpack();
        self.inner.signals.notify_sync(CHANGED, &snapshot);
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Configures a [`Ref`] before it is created.
#[derive(Debug, Clone)]
#[must_use]
pub struct RefBuilder<T> {
    initial: T,
    name: Option<String>,
    delayed_init: bool,
    deep: bool,
    types: Option<Vec<ValueKind>>,
    item_types: Option<Vec<ValueKind>>,
}

impl<T: Payload> RefBuilder<T> {
    /// Name used in logs and errors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Start not ready; notifications begin after [`Ref::ready`].
    pub fn delayed_init(mut self, delayed: bool) -> Self {
        self.delayed_init = delayed;
        self
    }

    /// Allow reactive views into nested containers.
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Kinds a write may have.
    pub fn types(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.types = Some(kinds.into_iter().collect());
        self
    }

    /// Kinds an element inserted through a container view may have.
    pub fn item_types(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.item_types = Some(kinds.into_iter().collect());
        self
    }

    pub fn build(self, scheduler: impl Scheduler + 'static) -> Ref<T> {
        self.build_shared(Arc::new(scheduler))
    }

    pub fn build_shared(self, scheduler: SharedScheduler) -> Ref<T> {
        let name = self.name.unwrap_or_else(|| "ref".to_owned());
        tracing::debug!(name = %name, delayed_init = self.delayed_init, deep = self.deep, "ref created");
        Ref {
            inner: Arc::new(RefInner {
                name,
                value: RwLock::new(self.initial),
                ready: AtomicBool::new(!self.delayed_init),
                deep: self.deep,
                types: self.types,
                item_types: self.item_types,
                version: AtomicU64::new(0),
                signals: Signals::with_shared(scheduler),
                tx: ReentrantMutex::new(Cell::new(0)),
            }),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::payload::Value;
    use lumen_core::event_loop::MainLoop;
    use std::sync::Mutex as StdMutex;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<StdMutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn write_notifies_on_next_turn() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(1, main_loop.handle());
        let (log, cb) = recorder::<i32>();
        cell.watch(cb);

        assert_eq!(cell.set(2), Ok(true));
        assert!(log.lock().unwrap().is_empty());
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn burst_of_writes_coalesces_to_latest() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(0, main_loop.handle());
        let (log, cb) = recorder::<i32>();
        cell.watch(cb);

        for v in 1..=4 {
            cell.set(v).unwrap();
        }
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![4]);
        assert_eq!(cell.version(), 4);
    }

    #[test]
    fn equal_write_is_noop() {
        let main_loop = MainLoop::new();
        let cell = Ref::new("a".to_string(), main_loop.handle());
        assert_eq!(cell.set("a".to_string()), Ok(false));
        assert_eq!(cell.version(), 0);
        assert_eq!(main_loop.pending_idle(), 0);
    }

    #[test]
    fn declared_types_reject_other_kinds() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(Value::Int(0))
            .name("count")
            .types([ValueKind::Int])
            .build(main_loop.handle());

        let err = cell.set(Value::from("x")).unwrap_err();
        assert!(matches!(err, RefError::TypeInvariantViolation { found: ValueKind::Str, .. }));
        assert_eq!(cell.unpack(), Value::Int(0));
    }

    #[test]
    fn dynamic_payload_keeps_its_kind_without_declared_types() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(Value::Int(0), main_loop.handle());
        assert!(cell.set(Value::Float(1.0)).is_err());
        assert_eq!(cell.set(Value::Int(3)), Ok(true));
    }

    #[test]
    fn declared_types_allow_several_kinds() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(None::<String>)
            .types([ValueKind::Null, ValueKind::Str])
            .build(main_loop.handle());
        assert_eq!(cell.set(Some("wall.png".into())), Ok(true));
        assert_eq!(cell.set(None), Ok(true));
    }

    #[test]
    fn delayed_init_suppresses_notifications_until_ready() {
        let main_loop = MainLoop::new();
        let cell = Ref::builder(0)
            .delayed_init(true)
            .build(main_loop.handle());
        let (log, cb) = recorder::<i32>();
        cell.watch(cb);

        cell.set(1).unwrap();
        cell.set(2).unwrap();
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());

        cell.ready();
        cell.ready();
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());

        cell.set(3).unwrap();
        main_loop.run_until_idle();
        assert_eq!(*log.lock().unwrap(), vec![3]);
    }

    #[test]
    fn bind_follows_source() {
        let main_loop = MainLoop::new();
        let celsius = Ref::new(0.0f64, main_loop.handle());
        let label = Ref::new(String::new(), main_loop.handle());
        let id = label.bind(&celsius, |c| format!("{c:.0}°C"));

        celsius.set(21.4).unwrap();
        main_loop.run_until_idle();
        assert_eq!(label.get(), "21°C");

        assert!(label.unbind(&celsius, id));
        celsius.set(30.0).unwrap();
        main_loop.run_until_idle();
        assert_eq!(label.get(), "21°C");
    }

    #[test]
    fn derived_starts_in_sync_and_is_pruned_when_dropped() {
        let main_loop = MainLoop::new();
        let volume = Ref::new(40u32, main_loop.handle());
        let muted = Ref::derived("muted", &volume, |v| *v == 0);
        assert!(!muted.get());

        volume.set(0).unwrap();
        main_loop.run_until_idle();
        assert!(muted.get());

        drop(muted);
        volume.set(10).unwrap();
        main_loop.run_until_idle();
        assert!(volume.handlers().is_empty());
    }

    #[test]
    fn posted_write_lands_on_loop() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(0, main_loop.handle());
        let remote = cell.clone();
        std::thread::spawn(move || remote.post(9))
            .join()
            .unwrap();
        assert_eq!(cell.unpack(), 0);
        main_loop.run_until_idle();
        assert_eq!(cell.unpack(), 9);
    }

    #[test]
    fn update_applies_closure() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(vec![1, 2], main_loop.handle());
        assert_eq!(cell.update(|v| v.push(3)), Ok(true));
        assert_eq!(cell.unpack(), vec![1, 2, 3]);
        assert_eq!(cell.update(|_| {}), Ok(false));
    }

    #[test]
    fn blocked_cell_applies_writes_silently() {
        let main_loop = MainLoop::new();
        let cell = Ref::new(0, main_loop.handle());
        let (log, cb) = recorder::<i32>();
        cell.watch(cb);

        cell.block();
        cell.set(5).unwrap();
        main_loop.run_until_idle();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(cell.unpack(), 5);

        cell.unblock();
        cell.notify_now();
        assert_eq!(*log.lock().unwrap(), vec![5]);
    }

    #[test]
    fn weak_watcher_is_pruned() {
        struct Widget;
        let main_loop = MainLoop::new();
        let cell = Ref::new(0, main_loop.handle());
        let widget = Arc::new(Widget);
        cell.watch_weak(WatchOptions::default(), &widget, |_w, _v| {});
        assert_eq!(cell.handlers().len(), 1);

        drop(widget);
        cell.set(1).unwrap();
        main_loop.run_until_idle();
        assert!(cell.handlers().is_empty());
    }
}
