//! Stargazer daemon: one task per system instance, hot reload of a
//! configuration directory, and the health and metrics servers.

pub mod counters;
mod error;
pub mod runtime;
pub mod servers;
pub mod settings;
pub mod watcher;

pub use counters::{install_recorder, SyncCounters};
pub use error::DaemonError;
pub use runtime::{drive, init_tracing, run, start_blocking, Orchestrator, RunOptions};
pub use settings::ServerSettings;
