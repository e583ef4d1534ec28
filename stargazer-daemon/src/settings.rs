//! Process-level settings read from the environment.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_HEALTH_PORT: u16 = 8081;
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// How long servers and in-flight passes get to finish after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub health_port: u16,
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: DEFAULT_HEALTH_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl ServerSettings {
    /// Read `HEALTH_PORT` and `METRICS_PORT` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Invalid values fall back to the default with a warning.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            health_port: port(lookup, "HEALTH_PORT", DEFAULT_HEALTH_PORT),
            metrics_port: port(lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
        }
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.health_port))
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.metrics_port))
    }
}

fn port(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => {
                warn!(key, value = %raw, default, "invalid port; using default");
                default
            }
        },
    }
}
