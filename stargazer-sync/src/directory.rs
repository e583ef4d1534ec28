//! Directory capability consumed by the reconciler, and the payloads it exchanges.
//!
//! The directory models a broker namespace as a *middleware* owning a list of
//! *endpoints* (one per topic) and a prefix. The connector itself is an
//! *agent*: it is patched for heartbeats, for error reporting and for
//! publishing topic details.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stargazer_core::{Endpoint, TopicMetadata};

use crate::SyncError;

/// The connector's own registration in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub agent_type: String,
}

/// Prefix and member endpoints of the middleware an instance is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Namespace {
    pub prefix: String,
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDetails {
    pub id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDetails {
    pub name: String,
    pub partitions: Vec<PartitionDetails>,
}

/// Topic details published on the agent record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Details {
    pub topics: Vec<TopicDetails>,
}

impl Details {
    /// Build details for `topics`, ordered by topic name.
    pub fn from_topics(topics: &[TopicMetadata]) -> Self {
        let mut topics: Vec<TopicDetails> = topics
            .iter()
            .map(|t| TopicDetails {
                name: t.name.clone(),
                partitions: t
                    .partitions
                    .iter()
                    .map(|&id| PartitionDetails { id })
                    .collect(),
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Self { topics }
    }
}

/// Partial update of the agent record. Absent fields are left untouched, so an
/// empty update is a pure heartbeat that only refreshes "last seen".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct AgentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Details>,
}

impl AgentUpdate {
    pub fn heartbeat() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            details: None,
        }
    }

    /// An explicit empty error string clears a previously reported error.
    pub fn clear_error() -> Self {
        Self::error("")
    }

    pub fn details(details: Details) -> Self {
        Self {
            error: None,
            details: Some(details),
        }
    }
}

/// Endpoint administration in the directory.
///
/// The directory has no bulk API: every create and delete is its own call.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn get_agent(&self) -> Result<Agent, SyncError>;

    /// Prefix of the bound middleware and those of its endpoints carrying it.
    async fn get_namespace(&self) -> Result<Namespace, SyncError>;

    async fn create_endpoint(&self, name: &str) -> Result<Endpoint, SyncError>;

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<(), SyncError>;

    async fn update_agent(&self, update: &AgentUpdate) -> Result<(), SyncError>;

    async fn ping(&self) -> Result<(), SyncError> {
        self.update_agent(&AgentUpdate::heartbeat()).await
    }

    async fn report_error(&self, message: &str) -> Result<(), SyncError> {
        self.update_agent(&AgentUpdate::error(message)).await
    }

    async fn clear_error(&self) -> Result<(), SyncError> {
        self.update_agent(&AgentUpdate::clear_error()).await
    }

    async fn publish_details(&self, details: Details) -> Result<(), SyncError> {
        self.update_agent(&AgentUpdate::details(details)).await
    }
}

#[async_trait]
impl<T: DirectoryClient + ?Sized> DirectoryClient for Arc<T> {
    async fn get_agent(&self) -> Result<Agent, SyncError> {
        (**self).get_agent().await
    }

    async fn get_namespace(&self) -> Result<Namespace, SyncError> {
        (**self).get_namespace().await
    }

    async fn create_endpoint(&self, name: &str) -> Result<Endpoint, SyncError> {
        (**self).create_endpoint(name).await
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<(), SyncError> {
        (**self).delete_endpoint(endpoint).await
    }

    async fn update_agent(&self, update: &AgentUpdate) -> Result<(), SyncError> {
        (**self).update_agent(update).await
    }
}
