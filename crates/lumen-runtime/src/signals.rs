#![forbid(unsafe_code)]

//! Per-owner named-signal multiplexer.
//!
//! A [`Signals`] bus belongs to one stateful object (a service, a cell) and
//! maps signal names to ordered handler tables. Producers either dispatch
//! inline with [`notify_sync`](Signals::notify_sync) or defer delivery to the
//! next loop turn with [`notify`](Signals::notify).
//!
//! # Ordering
//!
//! Handlers run in ascending `(priority, id)` order. Ids are allocated from a
//! per-bus counter, so equal-priority handlers run in registration order and a
//! larger priority runs *later*. Priority is a sort key only; it never changes
//! the id used to unwatch.
//!
//! # Deferred Delivery
//!
//! `notify` keeps one pending slot per signal name. The first call schedules
//! an idle task; later calls before that task runs only replace the slot's
//! arguments. The task delivers the most recent arguments exactly once.
//!
//! # Invariants
//!
//! 1. Handler ids are unique for the lifetime of the bus.
//! 2. Removing a handler removes it from its signal table and the reverse
//!    id index together.
//! 3. A handler unwatched during a dispatch round is not invoked later in
//!    that round; handlers added during a round wait for the next one.
//! 4. While a name is blocked, `notify_sync` for it is dropped, not queued.
//!
//! # Failure Modes
//!
//! - **Handler returns an error or panics**: logged at `ERROR` with the signal
//!   name and handler id, removed, and the round continues with the remaining
//!   handlers.
//! - **Weak subscriber dropped**: the handler reports itself dead on its next
//!   invocation and is pruned silently.
//! - **Bus dropped with a deferred notification pending**: the idle task finds
//!   the bus gone and does nothing.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use lumen_core::scheduler::{Scheduler, SharedScheduler};
use parking_lot::{Mutex, ReentrantMutex};

use crate::error::HandlerError;

// ─── Handler identity and options ────────────────────────────────────────────

/// Identifier returned by `watch`, used to unwatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration options for a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    once: bool,
    priority: i32,
}

impl WatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deregister after the first successful invocation.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Dispatch sort key. Larger values run later.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn is_once(&self) -> bool {
        self.once
    }

    #[must_use]
    pub fn get_priority(&self) -> i32 {
        self.priority
    }
}

/// What a handler reports back after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// The subscriber behind a weak handler is gone.
    Dead,
}

type Callback<A> = Arc<dyn Fn(&A) -> Result<Delivery, HandlerError> + Send + Sync>;

struct Entry<A> {
    callback: Callback<A>,
    once: bool,
}

impl<A> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            once: self.once,
        }
    }
}

// ─── Tables ──────────────────────────────────────────────────────────────────

struct Tables<A> {
    signals: HashMap<String, BTreeMap<(i32, HandlerId), Entry<A>>>,
    /// Reverse index: handler id → (signal name, priority).
    index: HashMap<HandlerId, (String, i32)>,
    blocked: HashSet<String>,
    next_id: u64,
}

impl<A> Tables<A> {
    fn new() -> Self {
        Self {
            signals: HashMap::new(),
            index: HashMap::new(),
            blocked: HashSet::new(),
            next_id: 1,
        }
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let Some((name, priority)) = self.index.remove(&id) else {
            return false;
        };
        if let Some(handlers) = self.signals.get_mut(&name) {
            handlers.remove(&(priority, id));
            if handlers.is_empty() {
                self.signals.remove(&name);
            }
        }
        true
    }
}

struct Inner<A> {
    tables: ReentrantMutex<RefCell<Tables<A>>>,
    /// Latest arguments per signal name with a deferred delivery in flight.
    pending: Mutex<HashMap<String, A>>,
    scheduler: SharedScheduler,
}

impl<A> Inner<A> {
    fn dispatch(&self, name: &str, args: &A) {
        let guard = self.tables.lock();
        let snapshot: Vec<(HandlerId, Entry<A>)> = {
            let tables = guard.borrow();
            if tables.blocked.contains(name) {
                return;
            }
            match tables.signals.get(name) {
                Some(handlers) => handlers
                    .iter()
                    .map(|(&(_, id), entry)| (id, entry.clone()))
                    .collect(),
                None => return,
            }
        };

        for (id, entry) in snapshot {
            if !guard.borrow().index.contains_key(&id) {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.callback)(args)));
            let remove = match outcome {
                Ok(Ok(Delivery::Delivered)) => entry.once,
                Ok(Ok(Delivery::Dead)) => true,
                Ok(Err(err)) => {
                    tracing::error!(signal = name, handler = %id, error = %err, "watcher failed, removing it");
                    true
                }
                Err(payload) => {
                    tracing::error!(
                        signal = name,
                        handler = %id,
                        panic = panic_message(payload.as_ref()),
                        "watcher panicked, removing it"
                    );
                    true
                }
            };
            if remove {
                guard.borrow_mut().remove(id);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ─── Signals ─────────────────────────────────────────────────────────────────

/// Named-signal bus carrying arguments of type `A`.
///
/// Cloning yields another handle to the same bus.
pub struct Signals<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Signals<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Signals<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.tables.lock();
        let tables = guard.borrow();
        f.debug_struct("Signals")
            .field("signals", &tables.signals.len())
            .field("handlers", &tables.index.len())
            .field("blocked", &tables.blocked)
            .finish()
    }
}

impl<A: Send + 'static> Signals<A> {
    /// Create a bus that defers deliveries through `scheduler`.
    pub fn new(scheduler: impl Scheduler + 'static) -> Self {
        Self::with_shared(Arc::new(scheduler))
    }

    /// Create a bus from an already shared scheduler.
    #[must_use]
    pub fn with_shared(scheduler: SharedScheduler) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: ReentrantMutex::new(RefCell::new(Tables::new())),
                pending: Mutex::new(HashMap::new()),
                scheduler,
            }),
        }
    }

    /// The scheduler deferred deliveries go through.
    #[must_use]
    pub fn scheduler(&self) -> &SharedScheduler {
        &self.inner.scheduler
    }

    /// Register `callback` for `name` with default options.
    pub fn watch(&self, name: &str, callback: impl Fn(&A) + Send + Sync + 'static) -> HandlerId {
        self.watch_with(name, WatchOptions::default(), callback)
    }

    /// Register `callback` for `name`.
    pub fn watch_with(
        &self,
        name: &str,
        options: WatchOptions,
        callback: impl Fn(&A) + Send + Sync + 'static,
    ) -> HandlerId {
        self.watch_raw(name, options, move |args| {
            callback(args);
            Ok(Delivery::Delivered)
        })
    }

    /// Register a fallible callback. Returning `Err` removes it.
    pub fn try_watch(
        &self,
        name: &str,
        options: WatchOptions,
        callback: impl Fn(&A) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> HandlerId {
        self.watch_raw(name, options, move |args| {
            callback(args).map(|()| Delivery::Delivered)
        })
    }

    /// Register a callback bound to `subscriber` without keeping it alive.
    ///
    /// Once every strong reference to `subscriber` is gone the handler is
    /// pruned on its next invocation.
    pub fn watch_weak<S: Send + Sync + 'static>(
        &self,
        name: &str,
        options: WatchOptions,
        subscriber: &Arc<S>,
        callback: impl Fn(&S, &A) + Send + Sync + 'static,
    ) -> HandlerId {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        self.watch_raw(name, options, move |args| match weak.upgrade() {
            Some(subscriber) => {
                callback(&subscriber, args);
                Ok(Delivery::Delivered)
            }
            None => Ok(Delivery::Dead),
        })
    }

    pub(crate) fn watch_raw(
        &self,
        name: &str,
        options: WatchOptions,
        callback: impl Fn(&A) -> Result<Delivery, HandlerError> + Send + Sync + 'static,
    ) -> HandlerId {
        let guard = self.inner.tables.lock();
        let mut tables = guard.borrow_mut();
        let id = HandlerId(tables.next_id);
        tables.next_id += 1;
        tables
            .index
            .insert(id, (name.to_owned(), options.priority));
        tables.signals.entry(name.to_owned()).or_default().insert(
            (options.priority, id),
            Entry {
                callback: Arc::new(callback),
                once: options.once,
            },
        );
        tracing::trace!(signal = name, handler = %id, priority = options.priority, "watcher added");
        id
    }

    /// Remove a handler by id. Returns `false` if it was not registered.
    pub fn unwatch(&self, id: HandlerId) -> bool {
        let guard = self.inner.tables.lock();
        let removed = guard.borrow_mut().remove(id);
        removed
    }

    /// Remove a handler only if it is registered under `name`.
    pub fn unwatch_in(&self, name: &str, id: HandlerId) -> bool {
        let guard = self.inner.tables.lock();
        let mut tables = guard.borrow_mut();
        match tables.index.get(&id) {
            Some((registered, _)) if registered == name => tables.remove(id),
            _ => false,
        }
    }

    /// Invoke every handler for `name` now, in dispatch order.
    pub fn notify_sync(&self, name: &str, args: &A) {
        self.inner.dispatch(name, args);
    }

    /// Deliver `args` to the handlers for `name` on the next loop turn.
    ///
    /// If a delivery for `name` is already pending, only its arguments are
    /// replaced.
    pub fn notify(&self, name: &str, args: A) {
        {
            let mut pending = self.inner.pending.lock();
            if let Some(slot) = pending.get_mut(name) {
                *slot = args;
                return;
            }
            pending.insert(name.to_owned(), args);
        }

        let weak = Arc::downgrade(&self.inner);
        let name = name.to_owned();
        self.inner.scheduler.schedule_idle(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let args = inner.pending.lock().remove(&name);
            if let Some(args) = args {
                inner.dispatch(&name, &args);
            }
        }));
    }

    /// Whether a deferred delivery for `name` is waiting for the loop.
    #[must_use]
    pub fn has_pending(&self, name: &str) -> bool {
        self.inner.pending.lock().contains_key(name)
    }

    /// Suppress `notify_sync` for `name` until [`unblock`](Self::unblock).
    pub fn block(&self, name: &str) {
        let guard = self.inner.tables.lock();
        guard.borrow_mut().blocked.insert(name.to_owned());
    }

    pub fn unblock(&self, name: &str) {
        let guard = self.inner.tables.lock();
        guard.borrow_mut().blocked.remove(name);
    }

    #[must_use]
    pub fn is_blocked(&self, name: &str) -> bool {
        let guard = self.inner.tables.lock();
        let blocked = guard.borrow().blocked.contains(name);
        blocked
    }

    /// Handler ids for `name`, in dispatch order.
    #[must_use]
    pub fn handlers(&self, name: &str) -> Vec<HandlerId> {
        let guard = self.inner.tables.lock();
        let tables = guard.borrow();
        tables
            .signals
            .get(name)
            .map(|handlers| handlers.keys().map(|&(_, id)| id).collect())
            .unwrap_or_default()
    }

    /// Drop every handler registered for `name`.
    pub fn clear(&self, name: &str) {
        let guard = self.inner.tables.lock();
        let mut tables = guard.borrow_mut();
        if let Some(handlers) = tables.signals.remove(name) {
            for (_, id) in handlers.into_keys() {
                tables.index.remove(&id);
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
