//! Error types for stargazer-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while locating, reading or validating a
/// configuration unit.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the path being read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; includes file path and line context from serde_yaml.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration path given on startup does not exist.
    #[error("configuration path not found: {path}")]
    NotFound { path: PathBuf },

    /// A directory was given but it holds no `*.yaml` / `*.yml` file.
    #[error("no configuration files found in {path}")]
    Empty { path: PathBuf },

    /// A required key is absent or blank after env overrides were applied.
    #[error("{path}: missing required key '{key}'")]
    MissingKey { path: PathBuf, key: &'static str },

    /// `sync.direction` holds a value other than the two recognised ones.
    #[error(
        "{path}: '{value}' is an invalid sync direction, expected 'broker_to_directory' or 'directory_to_broker'"
    )]
    InvalidDirection { path: PathBuf, value: String },

    /// A key holds a value that cannot be used (zero interval, bad prefix format, ...).
    #[error("{path}: invalid value for '{key}': {reason}")]
    InvalidValue {
        path: PathBuf,
        key: &'static str,
        reason: String,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
