//! # stargazer-sync
//!
//! Broker and directory clients, the reconciliation engine and the
//! per-instance state machine.
//!
//! Build a [`SystemInstance`] from a loaded configuration with
//! [`SystemInstance::from_config`], call [`SystemInstance::initialize`] once,
//! then drive [`SystemInstance::sync_topics`] and
//! [`SystemInstance::ping_directory`] from timers.

pub mod broker;
pub mod directory;
pub mod error;
pub mod factory;
pub mod http;
pub mod instance;
#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod reconciler;

pub use broker::BrokerClient;
pub use directory::{Agent, AgentUpdate, Details, DirectoryClient, Namespace};
pub use error::SyncError;
pub use factory::{ClientFactory, Clients, LiveClients};
pub use http::HttpDirectoryClient;
pub use instance::{InstanceState, SystemInstance};
#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
#[cfg(any(test, feature = "testing"))]
pub use memory::{BrokerOp, DirectoryOp, MemoryBroker, MemoryDirectory};
pub use reconciler::ReconcilerEngine;
