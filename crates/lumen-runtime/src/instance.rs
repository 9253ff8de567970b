#![forbid(unsafe_code)]

//! Well-known instances with an explicit initialization phase.
//!
//! Services such as the backlight or network managers exist once per
//! process. [`Instance`] is a process-wide slot for one of them: it is filled
//! exactly once with [`init`](Instance::init) during startup, and reading it
//! earlier fails with [`InstanceError::NotInitialized`] instead of quietly
//! constructing a default.
//!
//! [`ShellContext`] is the injected alternative: the handles every service
//! needs, built once and passed to constructors.

use std::sync::{Arc, OnceLock};

use lumen_core::event_loop::LoopHandle;

use crate::error::InstanceError;
use crate::event_bus::EventBus;
#[cfg(feature = "settings")]
use crate::settings::Settings;

/// A process-wide slot filled once at startup.
///
/// ```
/// use lumen_runtime::instance::Instance;
///
/// static BACKLIGHT: Instance<u32> = Instance::new("backlight");
///
/// assert!(BACKLIGHT.get().is_err());
/// BACKLIGHT.init(42).unwrap();
/// assert_eq!(*BACKLIGHT.get().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct Instance<T> {
    name: &'static str,
    slot: OnceLock<T>,
}

impl<T> Instance<T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: OnceLock::new(),
        }
    }

    /// Fill the slot. Fails if it is already filled.
    pub fn init(&self, value: T) -> Result<&T, InstanceError> {
        if self.slot.set(value).is_err() {
            return Err(InstanceError::AlreadyInitialized { name: self.name });
        }
        tracing::debug!(instance = self.name, "instance initialized");
        self.get()
    }

    pub fn get(&self) -> Result<&T, InstanceError> {
        self.slot
            .get()
            .ok_or(InstanceError::NotInitialized { name: self.name })
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Shared handles handed to services at startup.
#[derive(Debug, Clone)]
pub struct ShellContext {
    pub main_loop: LoopHandle,
    pub events: EventBus,
    #[cfg(feature = "settings")]
    pub settings: Arc<Settings>,
}

impl ShellContext {
    #[cfg(feature = "settings")]
    #[must_use]
    pub fn new(main_loop: LoopHandle, events: EventBus, settings: Arc<Settings>) -> Self {
        Self {
            main_loop,
            events,
            settings,
        }
    }

    #[cfg(not(feature = "settings"))]
    #[must_use]
    pub fn new(main_loop: LoopHandle, events: EventBus) -> Self {
        Self { main_loop, events }
    }

    /// The loop as a shared scheduler, for building cells.
    #[must_use]
    pub fn scheduler(&self) -> lumen_core::SharedScheduler {
        Arc::new(self.main_loop.clone())
    }
}
