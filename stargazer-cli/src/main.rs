//! Stargazer: keeps broker topics and directory endpoints in step.
//!
//! # Usage
//!
//! ```text
//! stargazer run <path> [--health-port <port>] [--metrics-port <port>]
//! stargazer check <path> [--json]
//! stargazer plan <path> [--json]
//! ```
//!
//! `<path>` is a single YAML configuration unit or a directory of them.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{check::CheckArgs, plan::PlanArgs, run::RunArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stargazer",
    version,
    about = "Synchronize Kafka topics with directory endpoints",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every configured instance plus the health and metrics servers.
    Run(RunArgs),

    /// Load and validate configuration units without connecting anywhere.
    Check(CheckArgs),

    /// Show what the next pass of each instance would change.
    Plan(PlanArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Plan(args) => args.run(),
    }
}
