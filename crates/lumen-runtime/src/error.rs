#[cfg(feature = "settings")]
use std::path::PathBuf;

use thiserror::Error;

use crate::reactive::payload::ValueKind;

/// Error returned by a fallible watcher. The watcher is removed after it
/// returns one.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised synchronously by [`Ref`](crate::reactive::Ref) writes and
/// container views. A write that fails leaves the cell untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    #[error("ref '{name}': type invariant violated, expected {}, found {found}", kinds(expected))]
    TypeInvariantViolation {
        name: String,
        expected: Vec<ValueKind>,
        found: ValueKind,
    },

    #[error("ref '{name}': expected {expected} at {path}, found {found}")]
    ShapeMismatch {
        name: String,
        path: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("ref '{name}': nothing at {path}")]
    MissingPath { name: String, path: String },

    #[error("ref '{name}' is not deep; nested container at {path} is not reactive")]
    NotDeep { name: String, path: String },

    #[error("ref '{name}': index {index} out of range for length {len}")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },
}

fn kinds(expected: &[ValueKind]) -> String {
    match expected {
        [one] => one.to_string(),
        many => {
            let names: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("one of [{}]", names.join(", "))
        }
    }
}

/// Errors from the process-wide instance registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    #[error("{name} is not initialized yet")]
    NotInitialized { name: &'static str },

    #[error("{name} is already initialized")]
    AlreadyInitialized { name: &'static str },
}

/// Errors from resolving [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot locate {what}: set {var} or HOME")]
    MissingHome { what: &'static str, var: &'static str },

    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Errors from the persistent settings store.
#[cfg(feature = "settings")]
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("setting '{name}' is not a bool")]
    NotBool { name: String },

    #[error("setting '{name}' has no default")]
    NoDefault { name: String },
}

#[cfg(feature = "settings")]
impl SettingsError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_expected_kind_is_named_directly() {
        let err = RefError::TypeInvariantViolation {
            name: "volume".into(),
            expected: vec![ValueKind::Int],
            found: ValueKind::Str,
        };
        assert_eq!(
            err.to_string(),
            "ref 'volume': type invariant violated, expected int, found str"
        );
    }

    #[test]
    fn several_expected_kinds_are_listed() {
        let err = RefError::TypeInvariantViolation {
            name: "wallpaper".into(),
            expected: vec![ValueKind::Null, ValueKind::Str],
            found: ValueKind::Int,
        };
        assert!(err.to_string().contains("one of [null, str]"));
    }

    #[test]
    fn instance_error_names_the_instance() {
        let err = InstanceError::NotInitialized { name: "backlight" };
        assert_eq!(err.to_string(), "backlight is not initialized yet");
    }
}
