//! Turns a [`SystemConfig`] into the pair of clients an instance owns.

use stargazer_core::{BrokerConfig, SystemConfig};

use crate::broker::BrokerClient;
use crate::directory::DirectoryClient;
use crate::http::HttpDirectoryClient;
use crate::SyncError;

/// The clients exclusively owned by one system instance.
pub struct Clients {
    pub broker: Box<dyn BrokerClient>,
    pub directory: Box<dyn DirectoryClient>,
}

/// Builds fresh clients for each instance. The daemon takes one of these so
/// tests can substitute in-memory clients.
pub trait ClientFactory: Send + Sync {
    fn build(&self, config: &SystemConfig) -> Result<Clients, SyncError>;
}

/// Production clients: HTTP directory plus the Kafka admin client.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveClients;

impl ClientFactory for LiveClients {
    fn build(&self, config: &SystemConfig) -> Result<Clients, SyncError> {
        Ok(Clients {
            broker: connect_broker(&config.broker)?,
            directory: Box::new(HttpDirectoryClient::new(&config.directory)?),
        })
    }
}

#[cfg(feature = "kafka")]
fn connect_broker(config: &BrokerConfig) -> Result<Box<dyn BrokerClient>, SyncError> {
    Ok(Box::new(crate::kafka::KafkaBroker::connect(config)?))
}

#[cfg(not(feature = "kafka"))]
fn connect_broker(config: &BrokerConfig) -> Result<Box<dyn BrokerClient>, SyncError> {
    Err(SyncError::BrokerUnreachable {
        servers: config.bootstrap_servers.join(","),
        reason: "stargazer was built without the `kafka` feature".into(),
    })
}
