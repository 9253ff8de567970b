#![forbid(unsafe_code)]

//! Logging bootstrap.
//!
//! Library code only emits `tracing` events; binaries decide where they go.
//! With the `logging` feature, [`init`] installs a `tracing-subscriber` fmt
//! subscriber filtered by an [`EnvFilter`](tracing_subscriber::EnvFilter).
//! `LUMEN_LOG` takes precedence over the directive passed in, so a user can
//! raise verbosity without touching configuration.
//!
//! With `tracing-json`, events are written as one JSON object per line.

use thiserror::Error;

/// Environment variable that overrides the configured filter directive.
pub const LOG_ENV: &str = "LUMEN_LOG";

/// Failure to install the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive could not be parsed.
    #[error("invalid log filter {directive:?}: {message}")]
    InvalidFilter { directive: String, message: String },

    /// A global subscriber is already installed.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Compact,
    /// One JSON object per event (requires the `tracing-json` feature).
    Json,
}

/// Resolve the effective directive: `LUMEN_LOG` if set and non-empty,
/// otherwise `default_directive`.
#[must_use]
pub fn effective_directive(default_directive: &str) -> String {
    std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_directive.to_string())
}

/// Install the global subscriber.
#[cfg(feature = "logging")]
pub fn init(default_directive: &str, format: LogFormat) -> Result<(), LoggingError> {
    use tracing_subscriber::EnvFilter;

    let directive = effective_directive(default_directive);
    let filter = EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.clone(),
        message: e.to_string(),
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match format {
        #[cfg(feature = "tracing-json")]
        LogFormat::Json => builder.json().try_init(),
        #[cfg(not(feature = "tracing-json"))]
        LogFormat::Json => builder.compact().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    result.map_err(|_| LoggingError::AlreadyInstalled)
}
