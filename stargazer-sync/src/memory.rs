//! In-memory broker and directory.
//!
//! Both keep their state behind a mutex and can be shared through `Arc`, so a
//! test can hand one clone to an instance and inspect the other. Failures are
//! injected per operation and stay active until cleared.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use stargazer_core::{Endpoint, TopicMetadata};

use crate::broker::{BrokerClient, TOPIC_PARTITIONS};
use crate::directory::{Agent, AgentUpdate, DirectoryClient, Namespace};
use crate::SyncError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BrokerOp {
    ListTopics,
    CreateTopics,
    DeleteTopics,
    Ping,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: BTreeMap<String, Vec<i32>>,
    failing: BTreeSet<BrokerOp>,
    calls: BTreeMap<BrokerOp, usize>,
}

/// Broker cluster held in memory.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let broker = Self::new();
        {
            let mut state = lock(&broker.state);
            for name in names {
                state
                    .topics
                    .insert(name.into(), (0..TOPIC_PARTITIONS).collect());
            }
        }
        broker
    }

    /// Current topic names, ascending.
    pub fn topic_names(&self) -> Vec<String> {
        lock(&self.state).topics.keys().cloned().collect()
    }

    pub fn fail(&self, op: BrokerOp) {
        lock(&self.state).failing.insert(op);
    }

    pub fn recover(&self, op: BrokerOp) {
        lock(&self.state).failing.remove(&op);
    }

    pub fn calls(&self, op: BrokerOp) -> usize {
        lock(&self.state).calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: BrokerOp) -> Result<MutexGuard<'_, BrokerState>, SyncError> {
        let mut state = lock(&self.state);
        *state.calls.entry(op).or_default() += 1;
        if state.failing.contains(&op) {
            return Err(SyncError::BrokerUnavailable(format!(
                "injected failure in {op:?}"
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>, SyncError> {
        let state = self.enter(BrokerOp::ListTopics)?;
        Ok(state
            .topics
            .iter()
            .map(|(name, partitions)| TopicMetadata::new(name.clone(), partitions.clone()))
            .collect())
    }

    async fn create_topics(&self, names: &[String]) -> Result<(), SyncError> {
        let mut state = self.enter(BrokerOp::CreateTopics)?;
        for name in names {
            state
                .topics
                .entry(name.clone())
                .or_insert_with(|| (0..TOPIC_PARTITIONS).collect());
        }
        Ok(())
    }

    async fn delete_topics(&self, names: &[String]) -> Result<(), SyncError> {
        let mut state = self.enter(BrokerOp::DeleteTopics)?;
        for name in names {
            state.topics.remove(name);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.enter(BrokerOp::Ping).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirectoryOp {
    GetAgent,
    GetNamespace,
    CreateEndpoint,
    DeleteEndpoint,
    UpdateAgent,
}

#[derive(Debug, Default)]
struct DirectoryState {
    agent: Option<Agent>,
    prefix: String,
    endpoints: Vec<Endpoint>,
    next_id: u64,
    failing: BTreeSet<DirectoryOp>,
    failing_names: BTreeSet<String>,
    calls: BTreeMap<DirectoryOp, usize>,
    updates: Vec<AgentUpdate>,
}

/// Directory middleware and agent held in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    /// A directory whose agent has `agent_type` and whose middleware owns `prefix`.
    pub fn new(agent_type: &str, prefix: &str) -> Self {
        let directory = Self::default();
        {
            let mut state = lock(&directory.state);
            state.agent = Some(Agent {
                id: "agent".into(),
                name: "memory agent".into(),
                agent_type: agent_type.into(),
            });
            state.prefix = prefix.into();
        }
        directory
    }

    pub fn with_endpoints<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = lock(&self.state);
            for name in names {
                let id = next_id(&mut state);
                state.endpoints.push(Endpoint {
                    id,
                    name: name.into(),
                });
            }
        }
        self
    }

    pub fn set_prefix(&self, prefix: &str) {
        lock(&self.state).prefix = prefix.into();
    }

    /// Every endpoint name, regardless of prefix, ascending.
    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state)
            .endpoints
            .iter()
            .map(|e| e.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn fail(&self, op: DirectoryOp) {
        lock(&self.state).failing.insert(op);
    }

    pub fn recover(&self, op: DirectoryOp) {
        lock(&self.state).failing.remove(&op);
    }

    /// Make creating or deleting the endpoint `name` fail.
    pub fn fail_endpoint(&self, name: &str) {
        lock(&self.state).failing_names.insert(name.into());
    }

    pub fn calls(&self, op: DirectoryOp) -> usize {
        lock(&self.state).calls.get(&op).copied().unwrap_or(0)
    }

    /// Every agent update received, oldest first.
    pub fn updates(&self) -> Vec<AgentUpdate> {
        lock(&self.state).updates.clone()
    }

    /// Number of explicit clear-error updates received.
    pub fn clear_error_calls(&self) -> usize {
        lock(&self.state)
            .updates
            .iter()
            .filter(|u| u.error.as_deref() == Some(""))
            .count()
    }

    /// Number of non-empty error reports received.
    pub fn error_reports(&self) -> usize {
        lock(&self.state)
            .updates
            .iter()
            .filter(|u| u.error.as_deref().is_some_and(|e| !e.is_empty()))
            .count()
    }

    fn enter(&self, op: DirectoryOp) -> Result<MutexGuard<'_, DirectoryState>, SyncError> {
        let mut state = lock(&self.state);
        *state.calls.entry(op).or_default() += 1;
        if state.failing.contains(&op) {
            return Err(injected(op));
        }
        Ok(state)
    }
}

fn next_id(state: &mut DirectoryState) -> String {
    state.next_id += 1;
    format!("endpoint-{}", state.next_id)
}

fn injected(op: DirectoryOp) -> SyncError {
    let method = match op {
        DirectoryOp::GetAgent | DirectoryOp::GetNamespace => "GET",
        DirectoryOp::CreateEndpoint => "POST",
        DirectoryOp::DeleteEndpoint => "DELETE",
        DirectoryOp::UpdateAgent => "PATCH",
    };
    SyncError::DirectoryStatus {
        method,
        url: format!("memory://{op:?}"),
        status: 503,
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn get_agent(&self) -> Result<Agent, SyncError> {
        let state = self.enter(DirectoryOp::GetAgent)?;
        state.agent.clone().ok_or(SyncError::DirectoryStatus {
            method: "GET",
            url: "memory://agent".into(),
            status: 404,
        })
    }

    async fn get_namespace(&self) -> Result<Namespace, SyncError> {
        let state = self.enter(DirectoryOp::GetNamespace)?;
        Ok(Namespace {
            prefix: state.prefix.clone(),
            endpoints: state
                .endpoints
                .iter()
                .filter(|e| e.name.starts_with(&state.prefix))
                .cloned()
                .collect(),
        })
    }

    async fn create_endpoint(&self, name: &str) -> Result<Endpoint, SyncError> {
        let mut state = self.enter(DirectoryOp::CreateEndpoint)?;
        if state.failing_names.contains(name) {
            return Err(injected(DirectoryOp::CreateEndpoint));
        }
        let endpoint = Endpoint {
            id: next_id(&mut state),
            name: name.into(),
        };
        state.endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, endpoint: &Endpoint) -> Result<(), SyncError> {
        let mut state = self.enter(DirectoryOp::DeleteEndpoint)?;
        if state.failing_names.contains(&endpoint.name) {
            return Err(injected(DirectoryOp::DeleteEndpoint));
        }
        state.endpoints.retain(|e| e.id != endpoint.id);
        Ok(())
    }

    async fn update_agent(&self, update: &AgentUpdate) -> Result<(), SyncError> {
        let mut state = self.enter(DirectoryOp::UpdateAgent)?;
        state.updates.push(update.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broker_create_is_idempotent_and_counts_calls() {
        let broker = MemoryBroker::with_topics(["ax.1"]);
        broker
            .create_topics(&["ax.1".into(), "ax.2".into()])
            .await
            .expect("create");
        assert_eq!(broker.topic_names(), vec!["ax.1", "ax.2"]);
        assert_eq!(broker.calls(BrokerOp::CreateTopics), 1);
    }

    #[tokio::test]
    async fn injected_failure_persists_until_recovered() {
        let directory = MemoryDirectory::new("managed-kafka", "ax.");
        directory.fail(DirectoryOp::GetNamespace);
        assert!(directory.get_namespace().await.is_err());
        assert!(directory.get_namespace().await.is_err());
        directory.recover(DirectoryOp::GetNamespace);
        assert!(directory.get_namespace().await.is_ok());
        assert_eq!(directory.calls(DirectoryOp::GetNamespace), 3);
    }

    #[tokio::test]
    async fn namespace_hides_foreign_endpoints() {
        let directory =
            MemoryDirectory::new("managed-kafka", "ax.").with_endpoints(["ax.1", "bx.1"]);
        let ns = directory.get_namespace().await.expect("namespace");
        assert_eq!(ns.endpoints.len(), 1);
        assert_eq!(directory.endpoint_names(), vec!["ax.1", "bx.1"]);
    }
}
