//! Domain types shared between the reconciler, the clients and the daemon.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which side of a system instance is authoritative.
///
/// The name follows the flow of truth: `BrokerToDirectory` copies the broker's
/// topic set into the directory, `DirectoryToBroker` copies the directory's
/// endpoint set into the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    BrokerToDirectory,
    DirectoryToBroker,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::BrokerToDirectory => "broker_to_directory",
            SyncDirection::DirectoryToBroker => "directory_to_broker",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broker_to_directory" => Ok(Self::BrokerToDirectory),
            "directory_to_broker" => Ok(Self::DirectoryToBroker),
            other => Err(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// A registration in the directory. Deletion is addressed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
}

/// A broker topic together with the ids of its partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    #[serde(default)]
    pub partitions: Vec<i32>,
}

impl TopicMetadata {
    pub fn new(name: impl Into<String>, partitions: Vec<i32>) -> Self {
        Self {
            name: name.into(),
            partitions,
        }
    }
}

/// Result of one reconciliation pass (or of a dry-run plan).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub prefix: String,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parses_config_values() {
        assert_eq!(
            "broker_to_directory".parse::<SyncDirection>(),
            Ok(SyncDirection::BrokerToDirectory)
        );
        assert_eq!(
            " Directory_To_Broker ".parse::<SyncDirection>(),
            Ok(SyncDirection::DirectoryToBroker)
        );
        assert_eq!(
            "kafka_to_starlify".parse::<SyncDirection>(),
            Err("kafka_to_starlify".to_string())
        );
    }

    #[test]
    fn direction_display_matches_config_value() {
        for direction in [
            SyncDirection::BrokerToDirectory,
            SyncDirection::DirectoryToBroker,
        ] {
            assert_eq!(
                direction.to_string().parse::<SyncDirection>(),
                Ok(direction)
            );
        }
    }

    #[test]
    fn empty_outcome_is_noop() {
        assert!(SyncOutcome::default().is_noop());
        let outcome = SyncOutcome {
            prefix: "e85da0fd6.".into(),
            created: vec!["e85da0fd6.orders".into()],
            deleted: vec![],
        };
        assert!(!outcome.is_noop());
    }
}
