//! One directional reconciliation pass.
//!
//! A pass reads both sides, restricts them to the instance's prefix, diffs the
//! sorted name lists and applies the difference to the side that is not
//! authoritative:
//!
//! | direction             | source of truth | mutated side | calls            |
//! |-----------------------|-----------------|--------------|------------------|
//! | `BrokerToDirectory`   | broker          | directory    | one per endpoint |
//! | `DirectoryToBroker`   | directory       | broker       | one batch each   |
//!
//! Nothing is mutated until every read has succeeded. A failed write stops the
//! pass; writes already applied stay applied and the next pass converges.

use stargazer_core::{
    filter_by_prefix, set_diff, sorted_unique, Endpoint, PrefixFormat, SyncDirection,
    SyncOutcome, TopicMetadata,
};
use tracing::{debug, info, warn};

use crate::broker::BrokerClient;
use crate::directory::{Details, DirectoryClient};
use crate::SyncError;

/// Both sides of a namespace, restricted to its prefix.
#[derive(Debug)]
struct Snapshot {
    prefix: String,
    topics: Vec<TopicMetadata>,
    endpoints: Vec<Endpoint>,
    /// Sorted, de-duplicated topic names.
    broker_names: Vec<String>,
    /// Sorted, de-duplicated endpoint names.
    directory_names: Vec<String>,
}

impl Snapshot {
    /// `(to_create, to_delete)` on the mutated side of `direction`.
    fn diff(&self, direction: SyncDirection) -> (Vec<String>, Vec<String>) {
        let (to_create, to_delete) = match direction {
            SyncDirection::BrokerToDirectory => set_diff(&self.directory_names, &self.broker_names),
            SyncDirection::DirectoryToBroker => set_diff(&self.broker_names, &self.directory_names),
        };
        // Only ever delete inside our own namespace.
        let to_delete = filter_by_prefix(&to_delete, &self.prefix);
        (to_create, to_delete)
    }
}

/// Tracks which writes of a pass went through, to report partial failures.
#[derive(Default)]
struct Applied(Vec<String>);

impl Applied {
    fn fail(self, failed: Vec<String>, err: SyncError) -> SyncError {
        if self.0.is_empty() {
            return err;
        }
        SyncError::PartialBatchFailure {
            applied: self.0,
            failed,
            reason: err.to_string(),
        }
    }
}

/// Executes passes for one instance against borrowed clients.
pub struct ReconcilerEngine<'a> {
    broker: &'a dyn BrokerClient,
    directory: &'a dyn DirectoryClient,
    format: &'a PrefixFormat,
}

impl<'a> ReconcilerEngine<'a> {
    pub fn new(
        broker: &'a dyn BrokerClient,
        directory: &'a dyn DirectoryClient,
        format: &'a PrefixFormat,
    ) -> Self {
        Self {
            broker,
            directory,
            format,
        }
    }

    /// Run exactly one pass in `direction`.
    pub async fn run(&self, direction: SyncDirection) -> Result<SyncOutcome, SyncError> {
        match direction {
            SyncDirection::BrokerToDirectory => self.sync_broker_to_directory().await,
            SyncDirection::DirectoryToBroker => self.sync_directory_to_broker().await,
        }
    }

    /// Compute what a pass in `direction` would do, without applying it.
    pub async fn plan(&self, direction: SyncDirection) -> Result<SyncOutcome, SyncError> {
        let snapshot = self.snapshot().await?;
        let (created, deleted) = snapshot.diff(direction);
        Ok(SyncOutcome {
            prefix: snapshot.prefix,
            created,
            deleted,
        })
    }

    /// Make the broker topic set match the directory's endpoints.
    pub async fn sync_directory_to_broker(&self) -> Result<SyncOutcome, SyncError> {
        let snapshot = self.snapshot().await?;
        let (to_create, to_delete) = snapshot.diff(SyncDirection::DirectoryToBroker);
        let mut applied = Applied::default();

        if !to_create.is_empty() {
            debug!(prefix = %snapshot.prefix, topics = ?to_create, "creating topics");
            if let Err(err) = self.broker.create_topics(&to_create).await {
                let failed = to_create.iter().chain(&to_delete).cloned().collect();
                return Err(applied.fail(failed, err));
            }
            applied.0.extend(to_create.iter().cloned());
        }

        if !to_delete.is_empty() {
            debug!(prefix = %snapshot.prefix, topics = ?to_delete, "deleting topics");
            if let Err(err) = self.broker.delete_topics(&to_delete).await {
                return Err(applied.fail(to_delete, err));
            }
        }

        let outcome = SyncOutcome {
            prefix: snapshot.prefix,
            created: to_create,
            deleted: to_delete,
        };
        log_outcome(SyncDirection::DirectoryToBroker, &outcome);
        Ok(outcome)
    }

    /// Make the directory's endpoints match the broker topic set, then publish
    /// the topic details on the agent.
    pub async fn sync_broker_to_directory(&self) -> Result<SyncOutcome, SyncError> {
        let snapshot = self.snapshot().await?;
        let (to_create, to_delete) = snapshot.diff(SyncDirection::BrokerToDirectory);
        let mut applied = Applied::default();

        for (i, name) in to_create.iter().enumerate() {
            if let Err(err) = self.directory.create_endpoint(name).await {
                let failed = to_create[i..].iter().chain(&to_delete).cloned().collect();
                return Err(applied.fail(failed, err));
            }
            applied.0.push(name.clone());
        }

        for (i, name) in to_delete.iter().enumerate() {
            for endpoint in snapshot.endpoints.iter().filter(|e| &e.name == name) {
                if let Err(err) = self.directory.delete_endpoint(endpoint).await {
                    return Err(applied.fail(to_delete[i..].to_vec(), err));
                }
            }
            applied.0.push(name.clone());
        }

        if let Err(err) = self
            .directory
            .publish_details(Details::from_topics(&snapshot.topics))
            .await
        {
            warn!(prefix = %snapshot.prefix, error = %err, "failed to publish topic details");
        }

        let outcome = SyncOutcome {
            prefix: snapshot.prefix,
            created: to_create,
            deleted: to_delete,
        };
        log_outcome(SyncDirection::BrokerToDirectory, &outcome);
        Ok(outcome)
    }

    async fn snapshot(&self) -> Result<Snapshot, SyncError> {
        let namespace = self.directory.get_namespace().await?;
        let prefix = namespace.prefix;
        self.format.validate(&prefix)?;

        let topics: Vec<TopicMetadata> = self
            .broker
            .list_topics()
            .await?
            .into_iter()
            .filter(|t| t.name.starts_with(&prefix))
            .collect();
        let endpoints: Vec<Endpoint> = namespace
            .endpoints
            .into_iter()
            .filter(|e| e.name.starts_with(&prefix))
            .collect();

        let broker_names = sorted_unique(topics.iter().map(|t| t.name.clone()));
        let directory_names = sorted_unique(endpoints.iter().map(|e| e.name.clone()));

        Ok(Snapshot {
            prefix,
            topics,
            endpoints,
            broker_names,
            directory_names,
        })
    }
}

fn log_outcome(direction: SyncDirection, outcome: &SyncOutcome) {
    if outcome.is_noop() {
        debug!(prefix = %outcome.prefix, direction = %direction, "already in sync");
    } else {
        info!(
            prefix = %outcome.prefix,
            direction = %direction,
            created = ?outcome.created,
            deleted = ?outcome.deleted,
            "reconciled"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
