#![forbid(unsafe_code)]

//! Process-wide event fan-out.
//!
//! An [`EventBus`] routes named events to watchers keyed by an event value.
//! A watcher registered for a specific value only hears events carrying that
//! value; a watcher registered for [`GLOBAL`] hears every event of the name.
//! Delivery is synchronous and transient: nothing is queued or replayed.
//!
//! # Ordering
//!
//! Exact-value watchers run first, in registration order, then wildcard
//! watchers, in registration order. An event whose value is itself
//! [`GLOBAL`] reaches each wildcard watcher once.
//!
//! # Failure Modes
//!
//! - **Watcher panics**: logged at `ERROR` with the event name and value,
//!   removed, and delivery continues with the remaining watchers.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::Value;
use crate::signals::HandlerId;

/// Event value that matches every value of a name.
pub const GLOBAL: &str = "global";

/// One delivered event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub value: String,
    pub data: Value,
}

type Watcher = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    /// name → value → watchers in registration order.
    watchers: HashMap<String, HashMap<String, Vec<(HandlerId, Watcher)>>>,
    next_id: u64,
}

impl Registry {
    fn collect(&self, name: &str, value: &str) -> Vec<(HandlerId, Watcher)> {
        let Some(by_value) = self.watchers.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<(HandlerId, Watcher)> = by_value.get(value).cloned().unwrap_or_default();
        if value != GLOBAL {
            out.extend(by_value.get(GLOBAL).into_iter().flatten().cloned());
        }
        out
    }

    fn remove(&mut self, id: HandlerId) -> bool {
        let mut removed = false;
        self.watchers.retain(|_, by_value| {
            by_value.retain(|_, list| {
                let before = list.len();
                list.retain(|(candidate, _)| *candidate != id);
                removed |= list.len() != before;
                !list.is_empty()
            });
            !by_value.is_empty()
        });
        removed
    }
}

/// Shared event bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventBus")
            .field("events", &registry.watchers.len())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch every event named `name`.
    pub fn watch(&self, name: &str, callback: impl Fn(&Event) + Send + Sync + 'static) -> HandlerId {
        self.watch_value(name, GLOBAL, callback)
    }

    /// Watch events named `name` that carry `value`.
    pub fn watch_value(
        &self,
        name: &str,
        value: &str,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> HandlerId {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = HandlerId::from_raw(registry.next_id);
        registry
            .watchers
            .entry(name.to_owned())
            .or_default()
            .entry(value.to_owned())
            .or_default()
            .push((id, Arc::new(callback)));
        tracing::debug!(event = name, value, watcher = %id, "event watcher added");
        id
    }

    pub fn unwatch(&self, id: HandlerId) -> bool {
        let removed = self.registry.lock().remove(id);
        if removed {
            tracing::debug!(watcher = %id, "event watcher removed");
        }
        removed
    }

    /// Deliver an event to its exact-value watchers, then to the wildcard
    /// watchers of its name.
    pub fn notify(&self, name: &str, value: &str, data: Value) {
        let event = Event {
            name: name.to_owned(),
            value: value.to_owned(),
            data,
        };
        self.emit(&event);
    }

    /// Deliver an already built event.
    pub fn emit(&self, event: &Event) {
        let targets = self.registry.lock().collect(&event.name, &event.value);
        for (id, watcher) in targets {
            if panic::catch_unwind(AssertUnwindSafe(|| watcher(event))).is_err() {
                tracing::error!(
                    event = %event.name,
                    value = %event.value,
                    watcher = %id,
                    "event watcher panicked, removing it"
                );
                self.unwatch(id);
            }
        }
    }

    /// Number of watchers that would hear `name` with `value`.
    #[must_use]
    pub fn watcher_count(&self, name: &str, value: &str) -> usize {
        self.registry.lock().collect(name, value).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder(tag: &'static str, log: &Arc<StdMutex<Vec<String>>>) -> impl Fn(&Event) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |event: &Event| log.lock().unwrap().push(format!("{tag}:{}", event.value))
    }

    #[test]
    fn exact_watchers_run_before_wildcard() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.watch("settings_changed", recorder("any", &log));
        bus.watch_value("settings_changed", "corners", recorder("corners", &log));

        bus.notify("settings_changed", "corners", Value::Bool(true));
        assert_eq!(*log.lock().unwrap(), vec!["corners:corners", "any:corners"]);
    }

    #[test]
    fn wildcard_hears_values_without_exact_watchers() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.watch("cli", recorder("any", &log));
        bus.watch_value("cli", "toggle", recorder("toggle", &log));

        bus.notify("cli", "reload", Value::Null);
        assert_eq!(*log.lock().unwrap(), vec!["any:reload"]);
    }

    #[test]
    fn global_value_delivers_once() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.watch("theme", recorder("any", &log));

        bus.notify("theme", GLOBAL, Value::Null);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn other_names_are_ignored() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.watch("theme", recorder("any", &log));
        bus.notify("clock", GLOBAL, Value::Null);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unwatch_by_id() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let id = bus.watch_value("popup", "open", recorder("open", &log));
        assert_eq!(bus.watcher_count("popup", "open"), 1);

        assert!(bus.unwatch(id));
        assert!(!bus.unwatch(id));
        bus.notify("popup", "open", Value::Null);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.watcher_count("popup", "open"), 0);
    }

    #[test]
    fn event_carries_data() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(None));
        let sink = Arc::clone(&seen);
        bus.watch("volume", move |event| *sink.lock().unwrap() = Some(event.data.clone()));

        bus.notify("volume", "speakers", Value::Int(70));
        assert_eq!(*seen.lock().unwrap(), Some(Value::Int(70)));
    }

    #[test]
    fn panicking_watcher_is_removed() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        bus.watch("x", |_| panic!("broken watcher"));
        bus.watch("x", recorder("ok", &log));

        bus.notify("x", "a", Value::Null);
        bus.notify("x", "b", Value::Null);
        assert_eq!(*log.lock().unwrap(), vec!["ok:a", "ok:b"]);
        assert_eq!(bus.watcher_count("x", GLOBAL), 1);
    }
}
