use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stargazer_core::{diff_sorted, discover, load_system_config, SystemConfig};
use stargazer_sync::{ClientFactory, SyncError, SystemInstance};

use crate::counters::{install_recorder, SyncCounters};
use crate::error::{io_err, DaemonError};
use crate::servers::{self, HEALTH_RATE, METRICS_RATE};
use crate::settings::{ServerSettings, SHUTDOWN_GRACE};
use crate::watcher::watch_configs;

// ---------------------------------------------------------------------------
// 1. Orchestrator
// ---------------------------------------------------------------------------

struct InstanceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one task per running system instance, keyed by configuration path.
pub struct Orchestrator {
    factory: Arc<dyn ClientFactory>,
    counters: Arc<SyncCounters>,
    cancel: CancellationToken,
    grace: Duration,
    instances: BTreeMap<PathBuf, InstanceHandle>,
    /// Tasks of stopped or replaced instances still finishing their last call.
    retired: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        counters: Arc<SyncCounters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            counters,
            cancel,
            grace: SHUTDOWN_GRACE,
            instances: BTreeMap::new(),
            retired: Vec::new(),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn counters(&self) -> &Arc<SyncCounters> {
        &self.counters
    }

    /// Configuration paths with a running (or starting) instance task.
    pub fn running(&self) -> Vec<PathBuf> {
        self.instances.keys().cloned().collect()
    }

    /// Load `path` and start its instance. A load failure is counted and the
    /// instance is not started.
    pub fn start_path(&mut self, path: &Path) -> Result<(), DaemonError> {
        match load_system_config(path) {
            Ok(config) => {
                self.start(config);
                Ok(())
            }
            Err(err) => {
                self.counters.record_error();
                Err(err.into())
            }
        }
    }

    /// Spawn the instance task for `config`, replacing any task for the same path.
    pub fn start(&mut self, config: SystemConfig) {
        let path = config.source.clone();
        self.stop(&path);

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(run_instance(
            config,
            Arc::clone(&self.factory),
            Arc::clone(&self.counters),
            cancel.clone(),
            self.grace,
        ));
        self.instances.insert(path, InstanceHandle { cancel, task });
    }

    /// Cancel the instance for `path`, if any. Its in-flight call keeps the grace window.
    pub fn stop(&mut self, path: &Path) {
        if let Some(handle) = self.instances.remove(path) {
            handle.cancel.cancel();
            self.retired.push(handle.task);
        }
    }

    /// Bring running instances in line with `desired` configuration paths:
    /// start new ones, stop removed ones and restart the `changed` ones.
    pub fn reload(&mut self, desired: Vec<PathBuf>, changed: &[PathBuf]) {
        let running: Vec<PathBuf> = self.instances.keys().cloned().collect();
        let mut wanted = desired;
        wanted.sort();
        wanted.dedup();
        let (to_start, to_stop) = diff_sorted(&running, &wanted);

        for path in &to_stop {
            info!(config = %path.display(), "configuration removed; stopping instance");
            self.stop(path);
        }

        let restarts = changed
            .iter()
            .filter(|p| self.instances.contains_key(*p))
            .cloned()
            .collect::<Vec<_>>();

        for path in restarts.into_iter().chain(to_start) {
            info!(config = %path.display(), "starting instance");
            if let Err(err) = self.start_path(&path) {
                error!(config = %path.display(), error = %err, "failed to load configuration");
            }
        }

        self.retired.retain(|task| !task.is_finished());
    }

    /// Wait for every instance task, current and retired, to exit.
    pub async fn wait(mut self) {
        let tasks = self
            .instances
            .into_values()
            .map(|h| h.task)
            .chain(self.retired.drain(..));
        for task in tasks.collect::<Vec<_>>() {
            if let Err(err) = task.await {
                error!(error = %err, "instance task join failure");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Instance task
// ---------------------------------------------------------------------------

async fn run_instance(
    config: SystemConfig,
    factory: Arc<dyn ClientFactory>,
    counters: Arc<SyncCounters>,
    cancel: CancellationToken,
    grace: Duration,
) {
    let name = config.name();
    let mut instance = match SystemInstance::from_config(config, factory.as_ref()) {
        Ok(instance) => instance,
        Err(err) => {
            counters.record_error();
            error!(instance = %name, error = %err, "failed to build clients");
            return;
        }
    };

    match with_grace(&cancel, grace, instance.initialize()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            counters.record_error();
            error!(instance = %name, error = %err, "instance initialization failed");
            return;
        }
        Err(_) => return,
    }

    drive(&mut instance, &counters, &cancel, grace).await;
    instance.stop();
    info!(instance = %name, "instance stopped");
}

/// Run the heartbeat and sync timers of one initialized instance until `cancel`.
///
/// Both timers are polled from this one task, so a ping and a pass of the same
/// instance never overlap and a slow call delays only this instance's ticks.
pub async fn drive(
    instance: &mut SystemInstance,
    counters: &SyncCounters,
    cancel: &CancellationToken,
    grace: Duration,
) {
    let mut heartbeat = interval(instance.config().heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sync = interval(instance.config().sync_interval);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = heartbeat.tick() => {
                match with_grace(cancel, grace, instance.ping_directory()).await {
                    Ok(Ok(())) => debug!(instance = %instance.name(), "heartbeat sent"),
                    Ok(Err(err)) => {
                        counters.record_error();
                        warn!(instance = %instance.name(), error = %err, "heartbeat failed");
                    }
                    Err(_) => break,
                }
            }
            _ = sync.tick() => {
                match with_grace(cancel, grace, instance.sync_topics()).await {
                    Ok(Ok(outcome)) => {
                        counters.record_success();
                        debug!(
                            instance = %instance.name(),
                            prefix = %outcome.prefix,
                            created = outcome.created.len(),
                            deleted = outcome.deleted.len(),
                            "pass completed"
                        );
                    }
                    Ok(Err(err)) => {
                        counters.record_error();
                        error!(
                            instance = %instance.name(),
                            state = %instance.state(),
                            error = %err,
                            "pass failed"
                        );
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

/// Await `fut`; once `cancel` fires it gets at most `grace` more to finish.
async fn with_grace<F: Future>(
    cancel: &CancellationToken,
    grace: Duration,
    fut: F,
) -> Result<F::Output, SyncError> {
    tokio::pin!(fut);
    tokio::select! {
        out = &mut fut => return Ok(out),
        _ = cancel.cancelled() => {}
    }
    tokio::time::timeout(grace, fut)
        .await
        .map_err(|_| SyncError::Cancelled)
}

// ---------------------------------------------------------------------------
// 3. Process entry points
// ---------------------------------------------------------------------------

pub struct RunOptions {
    /// A configuration file, or a directory of them.
    pub config_path: PathBuf,
    pub settings: ServerSettings,
    pub factory: Arc<dyn ClientFactory>,
}

/// Build a multi-threaded runtime and run the daemon on it.
pub fn start_blocking(options: RunOptions) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options))
}

/// Run every instance found under the configuration path plus the health and
/// metrics servers until SIGINT or SIGTERM.
pub async fn run(options: RunOptions) -> Result<(), DaemonError> {
    // Fatal before anything starts: unreadable path, or an invalid single file.
    let configs = discover(&options.config_path)?;
    let watch_dir = if options.config_path.is_dir() {
        Some(
            std::fs::canonicalize(&options.config_path)
                .map_err(|e| io_err(&options.config_path, e))?,
        )
    } else {
        load_system_config(&options.config_path)?;
        None
    };

    let handle = install_recorder()?;
    let counters = Arc::new(SyncCounters::new());
    let cancel = CancellationToken::new();

    let signal_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                signal = shutdown_signal() => {
                    info!("shutdown signal received");
                    cancel.cancel();
                    signal
                }
            }
        })
    };

    let health_handle = tokio::spawn(cancel_on_error(
        "health_server",
        cancel.clone(),
        servers::serve(
            "health",
            options.settings.health_addr(),
            servers::health_router(HEALTH_RATE)?,
            cancel.child_token(),
            SHUTDOWN_GRACE,
        ),
    ));
    let metrics_handle = tokio::spawn(cancel_on_error(
        "metrics_server",
        cancel.clone(),
        servers::serve(
            "metrics",
            options.settings.metrics_addr(),
            servers::metrics_router(handle, METRICS_RATE)?,
            cancel.child_token(),
            SHUTDOWN_GRACE,
        ),
    ));

    let mut orchestrator = Orchestrator::new(options.factory, counters, cancel.clone());
    let configs = match &watch_dir {
        Some(dir) => stargazer_core::config::list_config_files(dir)?,
        None => configs,
    };
    for path in &configs {
        if let Err(err) = orchestrator.start_path(path) {
            error!(config = %path.display(), error = %err, "failed to load configuration");
        }
    }
    info!(instances = orchestrator.running().len(), "daemon started");

    let watch_result = match &watch_dir {
        Some(dir) => watch_configs(dir, &mut orchestrator, cancel.clone()).await,
        None => {
            cancel.cancelled().await;
            Ok(())
        }
    };
    // Whatever ended the watch, everything else stops too.
    cancel.cancel();

    let counters = Arc::clone(orchestrator.counters());
    orchestrator.wait().await;
    let (health_result, metrics_result, signal_result) =
        tokio::join!(health_handle, metrics_handle, signal_handle);

    info!(
        syncs = counters.syncs(),
        errors = counters.errors(),
        "daemon stopped"
    );

    watch_result?;
    handle_join("health_server", health_result)?;
    handle_join("metrics_server", metrics_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Run an auxiliary task; if it fails, shut the whole daemon down.
async fn cancel_on_error<F>(
    task: &'static str,
    cancel: CancellationToken,
    fut: F,
) -> Result<(), DaemonError>
where
    F: Future<Output = Result<(), DaemonError>>,
{
    let result = fut.await;
    if let Err(err) = &result {
        error!(task, error = %err, "task failed; shutting down");
        cancel.cancel();
    }
    result
}

async fn shutdown_signal() -> Result<(), DaemonError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map_err(|e| io_err("ctrl-c handler", e)),
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| io_err("ctrl-c handler", e))
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task: task.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Install the global subscriber: JSON lines when `STARGAZER_ENV=prd`,
/// compact text otherwise. Filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let production = std::env::var("STARGAZER_ENV")
        .map(|env| env.eq_ignore_ascii_case("prd"))
        .unwrap_or(false);

    if production {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(test)]
mod tests {
    use stargazer_core::{BrokerAuth, BrokerConfig, DirectoryConfig, PrefixFormat, SyncDirection};
    use stargazer_sync::{Clients, DirectoryOp, MemoryBroker, MemoryDirectory};

    use super::*;

    fn config(name: &str) -> SystemConfig {
        SystemConfig {
            source: PathBuf::from(format!("/etc/stargazer/{name}.yaml")),
            direction: SyncDirection::BrokerToDirectory,
            sync_interval: Duration::from_secs(20),
            heartbeat_interval: Duration::from_secs(60),
            agent_type: "managed-kafka".into(),
            prefix_format: PrefixFormat {
                length: 3,
                start: "a".into(),
                end: ".".into(),
            },
            directory: DirectoryConfig {
                base_url: "http://127.0.0.1:1".into(),
                api_key: "k".into(),
                agent_id: "a".into(),
                middleware_id: "m".into(),
                timeout: Duration::from_secs(1),
                retry_count: 0,
            },
            broker: BrokerConfig {
                bootstrap_servers: vec!["127.0.0.1:9092".into()],
                auth: BrokerAuth::None,
            },
        }
    }

    struct OneInstance {
        broker: Arc<MemoryBroker>,
        directory: Arc<MemoryDirectory>,
    }

    impl ClientFactory for OneInstance {
        fn build(&self, _config: &SystemConfig) -> Result<Clients, SyncError> {
            Ok(Clients {
                broker: Box::new(Arc::clone(&self.broker)),
                directory: Box::new(Arc::clone(&self.directory)),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn instance_ticks_until_cancelled() {
        let factory = Arc::new(OneInstance {
            broker: Arc::new(MemoryBroker::with_topics(["ax.1"])),
            directory: Arc::new(MemoryDirectory::new("managed-kafka", "ax.")),
        });
        let cancel = CancellationToken::new();
        let mut orchestrator = Orchestrator::new(
            factory.clone(),
            Arc::new(SyncCounters::new()),
            cancel.clone(),
        );
        orchestrator.start(config("ax"));

        // Ticks at 0s, 20s and 40s.
        tokio::time::sleep(Duration::from_secs(45)).await;
        cancel.cancel();
        let counters = Arc::clone(orchestrator.counters());
        orchestrator.wait().await;

        assert_eq!(counters.syncs(), 3);
        assert_eq!(counters.errors(), 0);
        assert_eq!(factory.directory.endpoint_names(), vec!["ax.1"]);
        // One heartbeat at 0s, details after every pass.
        assert_eq!(factory.directory.calls(DirectoryOp::UpdateAgent), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialization_is_counted_and_not_retried() {
        let factory = Arc::new(OneInstance {
            broker: Arc::new(MemoryBroker::new()),
            directory: Arc::new(MemoryDirectory::new("something-else", "ax.")),
        });
        let cancel = CancellationToken::new();
        let mut orchestrator =
            Orchestrator::new(factory.clone(), Arc::new(SyncCounters::new()), cancel.clone());
        orchestrator.start(config("ax"));

        tokio::time::sleep(Duration::from_secs(45)).await;
        cancel.cancel();
        let counters = Arc::clone(orchestrator.counters());
        orchestrator.wait().await;

        assert_eq!(counters.errors(), 1);
        assert_eq!(counters.syncs(), 0);
        assert_eq!(factory.directory.calls(DirectoryOp::GetNamespace), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_bounds_a_stuck_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = with_grace(&cancel, Duration::from_secs(5), std::future::pending::<()>()).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = with_grace(&cancel, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            7
        })
        .await;
        assert_eq!(result.ok(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn reload_stops_removed_instances() {
        let factory = Arc::new(OneInstance {
            broker: Arc::new(MemoryBroker::new()),
            directory: Arc::new(MemoryDirectory::new("managed-kafka", "ax.")),
        });
        let cancel = CancellationToken::new();
        let mut orchestrator =
            Orchestrator::new(factory, Arc::new(SyncCounters::new()), cancel.clone());
        orchestrator.start(config("ax"));
        orchestrator.start(config("bx"));
        assert_eq!(orchestrator.running().len(), 2);

        orchestrator.reload(vec![PathBuf::from("/etc/stargazer/ax.yaml")], &[]);
        assert_eq!(
            orchestrator.running(),
            vec![PathBuf::from("/etc/stargazer/ax.yaml")]
        );

        cancel.cancel();
        orchestrator.wait().await;
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn reload_stops_instances_with_non_utf8_paths() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let factory = Arc::new(OneInstance {
            broker: Arc::new(MemoryBroker::new()),
            directory: Arc::new(MemoryDirectory::new("managed-kafka", "ax.")),
        });
        let cancel = CancellationToken::new();
        let mut orchestrator =
            Orchestrator::new(factory, Arc::new(SyncCounters::new()), cancel.clone());

        let odd = PathBuf::from(OsStr::from_bytes(b"/etc/stargazer/\xffax.yaml"));
        let mut unit = config("ax");
        unit.source = odd.clone();
        orchestrator.start(unit);
        orchestrator.start(config("bx"));

        orchestrator.reload(vec![odd.clone()], &[]);
        assert_eq!(orchestrator.running(), vec![odd]);

        orchestrator.reload(Vec::new(), &[]);
        assert!(orchestrator.running().is_empty());

        cancel.cancel();
        orchestrator.wait().await;
    }
}
