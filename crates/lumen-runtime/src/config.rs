#![forbid(unsafe_code)]

//! Runtime configuration resolved from the environment.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `LUMEN_SETTINGS` | Settings file path. |
//! | `XDG_CONFIG_HOME` | Base for the default settings path (`$XDG_CONFIG_HOME/lumen/settings.json`). |
//! | `XDG_CACHE_HOME` | Base for the cache directory (`$XDG_CACHE_HOME/lumen`). |
//! | `HOME` | Fallback base: `~/.config` and `~/.cache`. |
//! | `LUMEN_DEBUG` | `1`/`true`/`yes`/`on` enables debug logging. |
//! | `LUMEN_LOG` | Explicit log filter directive; wins over `LUMEN_DEBUG`. |

use std::path::PathBuf;

use lumen_core::logging::LOG_ENV;

use crate::error::ConfigError;

const APP_DIR: &str = "lumen";
const SETTINGS_FILE: &str = "settings.json";

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub settings_path: PathBuf,
    pub cache_dir: PathBuf,
    pub log_filter: String,
    pub debug: bool,
}

impl RuntimeConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let debug = match var("LUMEN_DEBUG") {
            None => false,
            Some(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidValue {
                var: "LUMEN_DEBUG",
                value: raw,
            })?,
        };

        let home = var("HOME").map(PathBuf::from);

        let settings_path = match var("LUMEN_SETTINGS") {
            Some(path) => PathBuf::from(path),
            None => {
                let base = var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .or_else(|| home.as_ref().map(|h| h.join(".config")))
                    .ok_or(ConfigError::MissingHome {
                        what: "settings file",
                        var: "XDG_CONFIG_HOME",
                    })?;
                base.join(APP_DIR).join(SETTINGS_FILE)
            }
        };

        let cache_dir = var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| home.as_ref().map(|h| h.join(".cache")))
            .ok_or(ConfigError::MissingHome {
                what: "cache directory",
                var: "XDG_CACHE_HOME",
            })?
            .join(APP_DIR);

        let log_filter =
            var(LOG_ENV).unwrap_or_else(|| (if debug { "debug" } else { "info" }).to_owned());

        Ok(Self {
            settings_path,
            cache_dir,
            log_filter,
            debug,
        })
    }

    /// Create the settings directory and the cache directory.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.cache_dir)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
