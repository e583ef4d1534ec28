//! `stargazer run`: the long-running daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use stargazer_daemon::{init_tracing, start_blocking, RunOptions, ServerSettings};
use stargazer_sync::LiveClients;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file, or a directory of `*.yaml` files to watch.
    pub path: PathBuf,

    /// Overrides `HEALTH_PORT`.
    #[arg(long)]
    pub health_port: Option<u16>,

    /// Overrides `METRICS_PORT`.
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        init_tracing();

        let mut settings = ServerSettings::from_env();
        if let Some(port) = self.health_port {
            settings.health_port = port;
        }
        if let Some(port) = self.metrics_port {
            settings.metrics_port = port;
        }

        start_blocking(RunOptions {
            config_path: self.path.clone(),
            settings,
            factory: Arc::new(LiveClients),
        })
        .with_context(|| format!("stargazer exited with error ({})", self.path.display()))
    }
}
