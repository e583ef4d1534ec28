//! Stargazer core library: domain types, set diff, prefix rules, configuration.
//!
//! Public API surface:
//! - [`types`]: domain structs shared by every crate
//! - [`diff`]: [`set_diff`], the sorted-merge reconciliation primitive
//! - [`prefix`]: [`PrefixFormat`] validation and prefix filtering
//! - [`config`]: YAML configuration units, env overrides, discovery
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod diff;
pub mod error;
pub mod prefix;
pub mod types;

pub use config::{
    discover, load_system_config, load_system_config_with_env, BrokerAuth, BrokerConfig,
    DirectoryConfig, SystemConfig,
};
pub use diff::{diff_sorted, set_diff, sorted_unique};
pub use error::ConfigError;
pub use prefix::{filter_by_prefix, PrefixError, PrefixFormat};
pub use types::{Endpoint, SyncDirection, SyncOutcome, TopicMetadata};
