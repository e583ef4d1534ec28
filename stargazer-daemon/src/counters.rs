//! Process-wide pass counters and their Prometheus exposition.
//!
//! - `stargazer_sync_count`: successful reconciliation passes
//! - `stargazer_error_count`: failed passes, heartbeats and instance startups

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::DaemonError;

pub const SYNC_COUNT: &str = "stargazer_sync_count";
pub const ERROR_COUNT: &str = "stargazer_error_count";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder once and return its render handle.
pub fn install_recorder() -> Result<PrometheusHandle, DaemonError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| DaemonError::Metrics(e.to_string()))?;

    describe_counter!(SYNC_COUNT, "Number of successful synchronization passes");
    describe_counter!(ERROR_COUNT, "Number of failed synchronization passes and heartbeats");
    // Register both so they are exported before the first pass.
    counter!(SYNC_COUNT).increment(0);
    counter!(ERROR_COUNT).increment(0);

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Success and error counters shared by every instance task.
///
/// Lock-free; each increment is mirrored into the `metrics` facade, which is a
/// no-op until [`install_recorder`] has run.
#[derive(Debug, Default)]
pub struct SyncCounters {
    syncs: AtomicU64,
    errors: AtomicU64,
}

impl SyncCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        counter!(SYNC_COUNT).increment(1);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(ERROR_COUNT).increment(1);
    }

    pub fn syncs(&self) -> u64 {
        self.syncs.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn counters_are_independent() {
        let counters = SyncCounters::new();
        counters.record_success();
        counters.record_success();
        counters.record_error();
        assert_eq!(counters.syncs(), 2);
        assert_eq!(counters.errors(), 1);
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let counters = Arc::new(SyncCounters::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        counters.record_success();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join");
        }
        assert_eq!(counters.syncs(), 800);
    }
}
