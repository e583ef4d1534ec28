//! `stargazer plan`: dry-run one pass per instance.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use stargazer_core::{discover, load_system_config, SyncDirection, SyncOutcome};
use stargazer_sync::{LiveClients, SyncError, SystemInstance};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Configuration file or directory.
    pub path: PathBuf,

    /// Print the plans as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct InstancePlan {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<SyncDirection>,
    #[serde(flatten)]
    outcome: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let files = discover(&self.path)
            .with_context(|| format!("cannot read configuration at {}", self.path.display()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        let mut plans = Vec::with_capacity(files.len());
        for path in &files {
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let plan = match load_system_config(path) {
                Ok(config) => {
                    let direction = config.direction;
                    match runtime.block_on(plan_one(config)) {
                        Ok(outcome) => InstancePlan {
                            name,
                            direction: Some(direction),
                            outcome: Some(outcome),
                            error: None,
                        },
                        Err(err) => InstancePlan {
                            name,
                            direction: Some(direction),
                            outcome: None,
                            error: Some(err.to_string()),
                        },
                    }
                }
                Err(err) => InstancePlan {
                    name,
                    direction: None,
                    outcome: None,
                    error: Some(err.to_string()),
                },
            };
            plans.push(plan);
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plans)?);
        } else {
            plans.iter().for_each(print_plan);
        }

        let failed = plans.iter().filter(|p| p.error.is_some()).count();
        if failed > 0 {
            bail!("{failed} instance(s) could not be planned");
        }
        Ok(())
    }
}

async fn plan_one(config: stargazer_core::SystemConfig) -> Result<SyncOutcome, SyncError> {
    let mut instance = SystemInstance::from_config(config, &LiveClients)?;
    instance.initialize().await?;
    instance.plan().await
}

fn print_plan(plan: &InstancePlan) {
    let Some(outcome) = &plan.outcome else {
        println!("✗ {}: {}", plan.name, plan.error.as_deref().unwrap_or("unknown error"));
        return;
    };
    let target = match plan.direction {
        Some(SyncDirection::BrokerToDirectory) => "directory",
        _ => "broker",
    };
    if outcome.is_noop() {
        println!("✓ '{}' [{}] nothing to do", plan.name, outcome.prefix);
        return;
    }
    println!(
        "'{}' [{}] would change the {target}:",
        plan.name, outcome.prefix
    );
    for name in &outcome.created {
        println!("  + {name}");
    }
    for name in &outcome.deleted {
        println!("  - {name}");
    }
}
