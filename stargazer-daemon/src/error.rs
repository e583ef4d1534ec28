use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, its servers and the config watcher.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("configuration error: {0}")]
    Config(#[from] stargazer_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] stargazer_sync::SyncError),

    #[error("failed to bind {server} server on {addr}: {source}")]
    Bind {
        server: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rate limit for {route}: {reason}")]
    RateLimit { route: &'static str, reason: String },

    #[error("metrics recorder error: {0}")]
    Metrics(String),

    #[error("{task} task join failure: {reason}")]
    Join { task: String, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
