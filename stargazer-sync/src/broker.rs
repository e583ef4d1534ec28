//! Broker admin capability consumed by the reconciler.

use std::sync::Arc;

use async_trait::async_trait;

use stargazer_core::TopicMetadata;

use crate::SyncError;

/// Partition count for every topic the connector creates.
pub const TOPIC_PARTITIONS: i32 = 1;
/// Replication factor for every topic the connector creates.
pub const TOPIC_REPLICATION: i32 = 1;

/// Topic administration on one broker cluster.
///
/// Creates and deletes are batched: one call covers every name of a pass.
/// Implementations must treat an empty batch as a no-op.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Every topic on the cluster with its partition ids.
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>, SyncError>;

    /// Create `names` with [`TOPIC_PARTITIONS`] and [`TOPIC_REPLICATION`].
    async fn create_topics(&self, names: &[String]) -> Result<(), SyncError>;

    async fn delete_topics(&self, names: &[String]) -> Result<(), SyncError>;

    /// Cheap liveness check used at instance startup.
    async fn ping(&self) -> Result<(), SyncError>;
}

#[async_trait]
impl<T: BrokerClient + ?Sized> BrokerClient for Arc<T> {
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>, SyncError> {
        (**self).list_topics().await
    }

    async fn create_topics(&self, names: &[String]) -> Result<(), SyncError> {
        (**self).create_topics(names).await
    }

    async fn delete_topics(&self, names: &[String]) -> Result<(), SyncError> {
        (**self).delete_topics(names).await
    }

    async fn ping(&self) -> Result<(), SyncError> {
        (**self).ping().await
    }
}
