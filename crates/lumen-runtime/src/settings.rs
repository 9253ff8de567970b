#![forbid(unsafe_code)]

//! Persistent user settings.
//!
//! [`Settings`] keeps a flat map of named [`Value`]s backed by a
//! [`SettingsStorage`]. Every successful [`set`](Settings::set) is saved
//! before it is announced on the [`EventBus`] as a `settings_changed` event
//! whose value is the setting name and whose data is the new value, so a
//! watcher can subscribe to one setting with
//! [`subscribe`](Settings::subscribe).
//!
//! Names without a stored value fall back to the defaults the store was
//! opened with ([`default_settings`] unless overridden).
//!
//! # Failure Modes
//!
//! - **Save fails**: `set` returns the I/O or JSON error and the in-memory
//!   value is left unchanged; nothing is announced.
//! - **Missing settings file**: [`JsonFileStorage`] creates it (and its parent
//!   directories) holding an empty object.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::SettingsError;
use crate::event_bus::EventBus;
use crate::reactive::Value;
use crate::signals::HandlerId;

/// Event name used to announce changes.
pub const SETTINGS_CHANGED: &str = "settings_changed";

/// Flat settings map.
pub type SettingsMap = BTreeMap<String, Value>;

/// Defaults for the settings the shell knows about.
#[must_use]
pub fn default_settings() -> SettingsMap {
    SettingsMap::from([
        ("time_format".to_owned(), Value::from("24")),
        ("bar_position".to_owned(), Value::from("top")),
        ("always_show_battery".to_owned(), Value::Bool(false)),
        ("corners".to_owned(), Value::Bool(false)),
    ])
}

// ─── Storage ─────────────────────────────────────────────────────────────────

/// Where settings are loaded from and saved to.
pub trait SettingsStorage: Send + Sync {
    fn load(&self) -> Result<SettingsMap, SettingsError>;
    fn save(&self, values: &SettingsMap) -> Result<(), SettingsError>;
}

/// Settings stored as one JSON object in a file.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(&self) -> Result<(), SettingsError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| SettingsError::io(parent, e))
            }
            _ => Ok(()),
        }
    }
}

impl SettingsStorage for JsonFileStorage {
    fn load(&self) -> Result<SettingsMap, SettingsError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "settings file missing, creating it");
                self.ensure_parent()?;
                fs::write(&self.path, "{}").map_err(|e| SettingsError::io(&self.path, e))?;
                Ok(SettingsMap::new())
            }
            Err(err) => Err(SettingsError::io(&self.path, err)),
        }
    }

    fn save(&self, values: &SettingsMap) -> Result<(), SettingsError> {
        self.ensure_parent()?;
        let text = serde_json::to_string(values)?;
        fs::write(&self.path, text).map_err(|e| SettingsError::io(&self.path, e))
    }
}

/// In-memory storage, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<SettingsMap>,
    saves: Mutex<usize>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new(initial: SettingsMap) -> Self {
        Self {
            values: Mutex::new(initial),
            saves: Mutex::new(0),
        }
    }

    /// Number of completed saves.
    #[must_use]
    pub fn saves(&self) -> usize {
        *self.saves.lock()
    }

    #[must_use]
    pub fn contents(&self) -> SettingsMap {
        self.values.lock().clone()
    }
}

impl SettingsStorage for MemoryStorage {
    fn load(&self) -> Result<SettingsMap, SettingsError> {
        Ok(self.values.lock().clone())
    }

    fn save(&self, values: &SettingsMap) -> Result<(), SettingsError> {
        *self.values.lock() = values.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

impl<S: SettingsStorage + ?Sized> SettingsStorage for std::sync::Arc<S> {
    fn load(&self) -> Result<SettingsMap, SettingsError> {
        (**self).load()
    }

    fn save(&self, values: &SettingsMap) -> Result<(), SettingsError> {
        (**self).save(values)
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Settings store bound to an event bus.
pub struct Settings {
    storage: Box<dyn SettingsStorage>,
    values: Mutex<SettingsMap>,
    defaults: SettingsMap,
    events: EventBus,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("values", &*self.values.lock())
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load settings from `storage` with the built-in defaults.
    pub fn open(storage: impl SettingsStorage + 'static, events: EventBus) -> Result<Self, SettingsError> {
        Self::with_defaults(storage, events, default_settings())
    }

    pub fn with_defaults(
        storage: impl SettingsStorage + 'static,
        events: EventBus,
        defaults: SettingsMap,
    ) -> Result<Self, SettingsError> {
        let values = storage.load()?;
        tracing::debug!(stored = values.len(), "settings loaded");
        Ok(Self {
            storage: Box::new(storage),
            values: Mutex::new(values),
            defaults,
            events,
        })
    }

    /// Stored value of `name`, else its default.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .lock()
            .get(name)
            .or_else(|| self.defaults.get(name))
            .cloned()
    }

    /// [`get`](Self::get) converted to `T`. `None` when missing or of
    /// another shape.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.get(name)?;
        let json = serde_json::to_value(value).ok()?;
        serde_json::from_value(json).ok()
    }

    /// Store, save, then announce `value` under `name`.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), SettingsError> {
        let value = value.into();
        {
            let mut values = self.values.lock();
            let mut next = values.clone();
            next.insert(name.to_owned(), value.clone());
            self.storage.save(&next)?;
            *values = next;
        }
        tracing::debug!(setting = name, value = %value, "setting changed");
        self.events.notify(SETTINGS_CHANGED, name, value);
        Ok(())
    }

    /// Restore the default of `name`.
    pub fn reset(&self, name: &str) -> Result<(), SettingsError> {
        let default = self
            .defaults
            .get(name)
            .cloned()
            .ok_or_else(|| SettingsError::NoDefault { name: name.to_owned() })?;
        self.set(name, default)
    }

    /// Flip a boolean setting. Returns the new value.
    pub fn toggle(&self, name: &str) -> Result<bool, SettingsError> {
        match self.get(name).as_ref().and_then(Value::as_bool) {
            Some(current) => {
                self.set(name, !current)?;
                Ok(!current)
            }
            None => Err(SettingsError::NotBool { name: name.to_owned() }),
        }
    }

    /// Switch between `first` and `second`. A value that is neither is left
    /// alone; returns whether anything changed.
    pub fn toggle_between(
        &self,
        name: &str,
        first: impl Into<Value>,
        second: impl Into<Value>,
    ) -> Result<bool, SettingsError> {
        let (first, second) = (first.into(), second.into());
        match self.get(name) {
            Some(current) if current == first => self.set(name, second).map(|()| true),
            Some(current) if current == second => self.set(name, first).map(|()| true),
            _ => Ok(false),
        }
    }

    /// Call `callback` with every new value of `name`, and once right away
    /// with the current one when `init_call` is set.
    pub fn subscribe(
        &self,
        name: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
        init_call: bool,
    ) -> HandlerId {
        if init_call {
            callback(&self.get(name).unwrap_or_default());
        }
        self.events
            .watch_value(SETTINGS_CHANGED, name, move |event| callback(&event.data))
    }

    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.events.unwatch(id)
    }

    /// Effective settings: defaults overlaid with stored values.
    #[must_use]
    pub fn snapshot(&self) -> SettingsMap {
        let mut merged = self.defaults.clone();
        merged.extend(self.values.lock().iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
