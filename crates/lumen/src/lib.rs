#![forbid(unsafe_code)]

//! Lumen public facade crate.
//!
//! Re-exports the stable surface of the workspace through [`prelude`] and
//! provides [`Shell`], the startup wiring every shell binary repeats:
//! resolve [`RuntimeConfig`], install logging, create the directories, open
//! the settings file, and build the [`ShellContext`] handed to services.
//!
//! ```no_run
//! use lumen::Shell;
//!
//! let shell = Shell::from_env()?;
//! let ctx = shell.context().clone();
//! // ... construct services with `ctx` ...
//! shell.run();
//! # Ok::<(), lumen::ShellError>(())
//! ```

use lumen_core::MainLoop;
use lumen_core::logging::LoggingError;
use lumen_runtime::config::RuntimeConfig;
use lumen_runtime::error::ConfigError;
#[cfg(feature = "settings")]
use lumen_runtime::error::SettingsError;
use lumen_runtime::event_bus::EventBus;
use lumen_runtime::instance::ShellContext;
use thiserror::Error;

pub use lumen_core as core;
pub use lumen_runtime as runtime;

pub mod prelude {
    pub use lumen_core as core;
    pub use lumen_runtime as runtime;

    pub use lumen_core::{LabClock, LoopHandle, MainLoop, Scheduler, SharedScheduler};
    #[cfg(feature = "async")]
    pub use lumen_runtime::AsyncDebounced;
    #[cfg(feature = "settings")]
    pub use lumen_runtime::Settings;
    pub use lumen_runtime::{
        CHANGED, Computed, DebouncePolicy, Debounced, Event, EventBus, HandlerId, Instance,
        Ref, RefError, ShellContext, Signals, Transaction, Value, ValueKind, WatchOptions,
    };

    pub use crate::{Shell, ShellError};
}

/// Failure during shell startup.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error("cannot create runtime directories: {0}")]
    Dirs(#[source] std::io::Error),

    #[cfg(feature = "settings")]
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// A started shell: the main loop plus the context services are built with.
#[derive(Debug)]
pub struct Shell {
    config: RuntimeConfig,
    main_loop: MainLoop,
    context: ShellContext,
}

impl Shell {
    /// Resolve configuration from the environment, install logging, start.
    pub fn from_env() -> Result<Self, ShellError> {
        let config = RuntimeConfig::from_env()?;
        init_logging(&config)?;
        Self::start(config)
    }

    /// Start from an already resolved configuration. Does not touch logging.
    pub fn start(config: RuntimeConfig) -> Result<Self, ShellError> {
        config.create_dirs().map_err(ShellError::Dirs)?;

        let main_loop = MainLoop::new();
        let events = EventBus::new();

        #[cfg(feature = "settings")]
        let context = {
            use lumen_runtime::settings::{JsonFileStorage, Settings};
            let settings = Settings::open(JsonFileStorage::new(&config.settings_path), events.clone())?;
            ShellContext::new(main_loop.handle(), events, std::sync::Arc::new(settings))
        };
        #[cfg(not(feature = "settings"))]
        let context = ShellContext::new(main_loop.handle(), events);

        tracing::info!(
            settings = %config.settings_path.display(),
            cache = %config.cache_dir.display(),
            debug = config.debug,
            "shell started"
        );
        Ok(Self {
            config,
            main_loop,
            context,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> &ShellContext {
        &self.context
    }

    #[must_use]
    pub fn main_loop(&self) -> &MainLoop {
        &self.main_loop
    }

    /// Drive the loop until [`LoopHandle::quit`](lumen_core::LoopHandle::quit).
    pub fn run(&self) {
        self.main_loop.run();
    }
}

/// Install the global subscriber with the configured filter.
///
/// A subscriber installed earlier (by a test harness, say) is left in place.
#[cfg(feature = "logging")]
pub fn init_logging(config: &RuntimeConfig) -> Result<(), ShellError> {
    use lumen_core::logging::{self, LogFormat};

    let format = if cfg!(feature = "tracing-json") {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    match logging::init(&config.log_filter, format) {
        Ok(()) | Err(LoggingError::AlreadyInstalled) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(feature = "logging"))]
pub fn init_logging(_config: &RuntimeConfig) -> Result<(), ShellError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_runtime::reactive::Ref;
    use std::path::Path;

    fn config_in(home: &Path) -> RuntimeConfig {
        let home = home.to_string_lossy().into_owned();
        RuntimeConfig::from_lookup(|key| (key == "HOME").then(|| home.clone())).unwrap()
    }

    #[test]
    fn start_creates_directories() {
        let home = tempfile::tempdir().unwrap();
        let shell = Shell::start(config_in(home.path())).unwrap();
        assert!(shell.config().cache_dir.is_dir());
        assert!(shell.config().settings_path.parent().unwrap().is_dir());
    }

    #[cfg(feature = "settings")]
    #[test]
    fn start_opens_settings_file() {
        let home = tempfile::tempdir().unwrap();
        let shell = Shell::start(config_in(home.path())).unwrap();
        assert!(shell.config().settings_path.is_file());
        shell.context().settings.set("corners", true).unwrap();

        let reopened = Shell::start(config_in(home.path())).unwrap();
        assert_eq!(
            reopened.context().settings.get("corners"),
            Some(lumen_runtime::Value::Bool(true))
        );
    }

    #[test]
    fn context_drives_cells_on_the_shell_loop() {
        let home = tempfile::tempdir().unwrap();
        let shell = Shell::start(config_in(home.path())).unwrap();
        let cell = Ref::builder(0_i64).build_shared(shell.context().scheduler());
        cell.set(3).unwrap();
        assert_eq!(shell.main_loop().run_until_idle(), 1);
    }

    #[test]
    fn quit_from_another_thread_stops_run() {
        let home = tempfile::tempdir().unwrap();
        let shell = Shell::start(config_in(home.path())).unwrap();
        let handle = shell.context().main_loop.clone();
        let quitter = std::thread::spawn(move || handle.quit());
        shell.run();
        quitter.join().unwrap();
    }
}
