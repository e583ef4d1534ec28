//! `stargazer check`: offline validation of configuration units.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use stargazer_core::{discover, load_system_config, SystemConfig};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Configuration file or directory.
    pub path: PathBuf,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct UnitReport {
    path: PathBuf,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl UnitReport {
    fn new(path: &Path, result: Result<SystemConfig, stargazer_core::ConfigError>) -> Self {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match result {
            Ok(config) => Self {
                path: path.to_path_buf(),
                name,
                direction: Some(config.direction.to_string()),
                auth: Some(config.broker.auth.mechanism()),
                error: None,
            },
            Err(err) => Self {
                path: path.to_path_buf(),
                name,
                direction: None,
                auth: None,
                error: Some(err.to_string()),
            },
        }
    }
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let files = discover(&self.path)
            .with_context(|| format!("cannot read configuration at {}", self.path.display()))?;

        let reports: Vec<UnitReport> = files
            .iter()
            .map(|path| UnitReport::new(path, load_system_config(path)))
            .collect();
        let invalid = reports.iter().filter(|r| r.error.is_some()).count();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else {
            for report in &reports {
                match (&report.error, &report.direction) {
                    (Some(err), _) => println!("✗ {}: {err}", report.path.display()),
                    (None, Some(direction)) => println!(
                        "✓ {} ({direction}, auth {})",
                        report.name,
                        report.auth.unwrap_or("none")
                    ),
                    (None, None) => println!("✓ {}", report.name),
                }
            }
            println!("{} valid, {invalid} invalid", reports.len() - invalid);
        }

        if invalid > 0 {
            bail!("{invalid} configuration unit(s) invalid");
        }
        Ok(())
    }
}
