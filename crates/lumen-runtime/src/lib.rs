#![forbid(unsafe_code)]

//! Reactive state core for the Lumen desktop shell.
//!
//! Services publish their state through observable cells ([`Ref`]) and named
//! signals ([`Signals`]); widgets subscribe and are told about changes on the
//! next turn of the main loop. Around that core sit a process-wide
//! [`EventBus`], rate limiting ([`Debounced`]), persistent [`Settings`], and
//! explicitly initialized singletons ([`Instance`]).
//!
//! # Threading
//!
//! Everything here is `Send + Sync`. Writes may come from any thread; watcher
//! callbacks run on whichever thread drives the [`MainLoop`](lumen_core::MainLoop)
//! that the cell or bus was built with.

pub mod config;
pub mod debounce;
pub mod error;
pub mod event_bus;
pub mod instance;
pub mod reactive;
#[cfg(feature = "settings")]
pub mod settings;
pub mod signals;

pub use config::RuntimeConfig;
#[cfg(feature = "async")]
pub use debounce::AsyncDebounced;
pub use debounce::{DebouncePolicy, Debounced};
#[cfg(feature = "settings")]
pub use error::SettingsError;
pub use error::{ConfigError, HandlerError, InstanceError, RefError};
pub use event_bus::{Event, EventBus, GLOBAL};
pub use instance::{Instance, ShellContext};
pub use reactive::{
    CHANGED, Computed, Dependency, ListView, MapView, Payload, Ref, RefBuilder, SetView,
    Transaction, Value, ValueKind,
};
#[cfg(feature = "settings")]
pub use settings::{JsonFileStorage, MemoryStorage, Settings, SettingsStorage};
pub use signals::{HandlerId, Signals, WatchOptions};
