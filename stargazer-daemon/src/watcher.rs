//! Hot reload of a configuration directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use stargazer_core::config::list_config_files;

use crate::runtime::Orchestrator;
use crate::DaemonError;

/// Quiet period after the last event on a path before it is acted on.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Collects changed paths and releases them once no new event arrived for a
/// whole window, so an editor's burst of writes yields one reload.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeSet::new(),
            last_event: None,
        }
    }

    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path);
        self.last_event = Some(now);
    }

    /// When the pending batch becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|at| at + self.window)
    }

    /// Take the pending batch if the window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.pending).into_iter().collect())
    }
}

pub fn is_config_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watch `dir` and keep the orchestrator's instances in line with its
/// configuration files until `cancel` fires.
pub async fn watch_configs(
    dir: &Path,
    orchestrator: &mut Orchestrator,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    debug!(dir = %dir.display(), "watching configuration directory");

    let mut debouncer = Debouncer::new(DEBOUNCE_WINDOW);

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until(deadline) => {
                let Some(changed) = debouncer.take_due(Instant::now()) else { continue };
                match list_config_files(dir) {
                    Ok(desired) => orchestrator.reload(desired, &changed),
                    Err(err) => warn!(error = %err, "failed to rescan configuration directory"),
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths.into_iter().filter(|p| is_config_file(p)) {
                    debouncer.push(path, Instant::now());
                }
            }
        }
    }

    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
