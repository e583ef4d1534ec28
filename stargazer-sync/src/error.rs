//! Error types for stargazer-sync.

use thiserror::Error;

use stargazer_core::{ConfigError, PrefixError};

/// All errors that can arise while talking to the broker or the directory, or
/// while running a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration could not be turned into working clients.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The directory agent is registered for a different integration.
    #[error("directory agent '{agent_id}' is of type '{found}', expected '{expected}'")]
    AgentTypeMismatch {
        agent_id: String,
        found: String,
        expected: String,
    },

    /// Startup liveness check against the broker failed.
    #[error("broker unreachable at {servers}: {reason}")]
    BrokerUnreachable { servers: String, reason: String },

    /// The namespace prefix handed out by the directory is malformed.
    #[error("invalid prefix: {0}")]
    InvalidPrefix(#[from] PrefixError),

    /// Transport failure or timeout talking to the directory.
    #[error("directory unavailable ({context}): {source}")]
    DirectoryUnavailable {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The directory answered with a non-success status.
    #[error("directory request {method} {url} failed with status {status}")]
    DirectoryStatus {
        method: &'static str,
        url: String,
        status: u16,
    },

    /// A `GET` kept answering `200` with an empty body until the retry budget ran out.
    #[error("directory returned an empty body for GET {url} after {attempts} attempts")]
    EmptyResponse { url: String, attempts: u32 },

    /// The directory payload could not be decoded.
    #[error("failed to decode directory response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// Transport or protocol failure talking to the broker.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Some operations of a pass were applied before one failed. Nothing is rolled back.
    #[error(
        "partial batch failure: applied {applied:?}, failed {failed:?}: {reason}"
    )]
    PartialBatchFailure {
        applied: Vec<String>,
        failed: Vec<String>,
        reason: String,
    },

    /// The pass was abandoned because shutdown outlived the grace window.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl SyncError {
    /// True for errors that only affect the current pass; the next tick retries.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            SyncError::Config(_)
                | SyncError::AgentTypeMismatch { .. }
                | SyncError::BrokerUnreachable { .. }
        )
    }
}

pub(crate) fn transport_err(context: impl Into<String>, source: reqwest::Error) -> SyncError {
    SyncError::DirectoryUnavailable {
        context: context.into(),
        source,
    }
}
