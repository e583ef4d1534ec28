//! One configured connector between a broker namespace and a directory namespace.

use std::fmt;

use tracing::{info, warn};

use stargazer_core::{SyncOutcome, SystemConfig};

use crate::broker::BrokerClient;
use crate::directory::DirectoryClient;
use crate::factory::{ClientFactory, Clients};
use crate::reconciler::ReconcilerEngine;
use crate::SyncError;

/// Lifecycle of a [`SystemInstance`].
///
/// ```text
/// Initializing ──▶ Running ◀──▶ Degraded
///                     │            │
///                     └──▶ Stopped ◀┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Initializing,
    Running,
    Degraded,
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Initializing => "initializing",
            InstanceState::Running => "running",
            InstanceState::Degraded => "degraded",
            InstanceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A system instance owns its configuration and its two clients.
///
/// Both [`sync_topics`](Self::sync_topics) and
/// [`ping_directory`](Self::ping_directory) take `&mut self`, so two calls on
/// the same instance can never overlap.
pub struct SystemInstance {
    name: String,
    config: SystemConfig,
    broker: Box<dyn BrokerClient>,
    directory: Box<dyn DirectoryClient>,
    state: InstanceState,
    error_reported: bool,
}

impl SystemInstance {
    pub fn new(config: SystemConfig, clients: Clients) -> Self {
        Self {
            name: config.name(),
            config,
            broker: clients.broker,
            directory: clients.directory,
            state: InstanceState::Initializing,
            error_reported: false,
        }
    }

    /// Build the clients for `config` through `factory`.
    pub fn from_config(
        config: SystemConfig,
        factory: &dyn ClientFactory,
    ) -> Result<Self, SyncError> {
        let clients = factory.build(&config)?;
        Ok(Self::new(config, clients))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// True while an error is reported on the directory agent and not yet cleared.
    pub fn error_reported(&self) -> bool {
        self.error_reported
    }

    /// Verify the directory agent type and broker reachability.
    ///
    /// Failing here is fatal to the instance: it never reaches `Running`.
    pub async fn initialize(&mut self) -> Result<(), SyncError> {
        let agent = self.directory.get_agent().await?;
        if agent.agent_type != self.config.agent_type {
            return Err(SyncError::AgentTypeMismatch {
                agent_id: self.config.directory.agent_id.clone(),
                found: agent.agent_type,
                expected: self.config.agent_type.clone(),
            });
        }

        self.broker.ping().await.map_err(|err| match err {
            SyncError::BrokerUnreachable { .. } => err,
            other => SyncError::BrokerUnreachable {
                servers: self.config.broker.bootstrap_servers.join(","),
                reason: other.to_string(),
            },
        })?;

        self.state = InstanceState::Running;
        info!(
            instance = %self.name,
            direction = %self.config.direction,
            agent = %agent.name,
            auth = self.config.broker.auth.mechanism(),
            "instance initialized"
        );
        Ok(())
    }

    /// Run one pass in the configured direction and update the error flag.
    ///
    /// A failure is reported to the directory before it is returned. The first
    /// success after a reported failure clears the error on the directory.
    pub async fn sync_topics(&mut self) -> Result<SyncOutcome, SyncError> {
        let result = ReconcilerEngine::new(
            self.broker.as_ref(),
            self.directory.as_ref(),
            &self.config.prefix_format,
        )
        .run(self.config.direction)
        .await;

        match &result {
            Ok(_) => {
                if self.error_reported {
                    match self.directory.clear_error().await {
                        Ok(()) => {
                            self.error_reported = false;
                            info!(instance = %self.name, "cleared reported error");
                        }
                        Err(err) => {
                            warn!(instance = %self.name, error = %err, "failed to clear reported error");
                        }
                    }
                }
                self.state = InstanceState::Running;
            }
            Err(err) => {
                if let Err(report_err) = self.directory.report_error(&err.to_string()).await {
                    warn!(
                        instance = %self.name,
                        error = %report_err,
                        "failed to report error to directory"
                    );
                }
                self.error_reported = true;
                self.state = InstanceState::Degraded;
            }
        }
        result
    }

    /// Heartbeat: refresh the agent's "last seen" without changing anything else.
    pub async fn ping_directory(&mut self) -> Result<(), SyncError> {
        self.directory.ping().await
    }

    /// What the next pass would change, without applying it.
    pub async fn plan(&self) -> Result<SyncOutcome, SyncError> {
        ReconcilerEngine::new(
            self.broker.as_ref(),
            self.directory.as_ref(),
            &self.config.prefix_format,
        )
        .plan(self.config.direction)
        .await
    }

    pub fn stop(&mut self) {
        self.state = InstanceState::Stopped;
    }
}

impl fmt::Debug for SystemInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemInstance")
            .field("name", &self.name)
            .field("direction", &self.config.direction)
            .field("state", &self.state)
            .field("error_reported", &self.error_reported)
            .finish()
    }
}
