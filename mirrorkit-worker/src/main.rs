//! mirrorkit worker: runs mirror sync jobs with copy-on-write publishing.
//!
//! # Usage
//!
//! ```text
//! mirrorkit-worker [--config PATH] run <mirror>
//! mirrorkit-worker [--config PATH] snapshots <mirror> [--json]
//! ```

mod commands;
mod config;
mod error;
mod runner;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{run::RunArgs, snapshots::SnapshotsArgs};

#[derive(Parser, Debug)]
#[command(
    name = "mirrorkit-worker",
    version,
    about = "Sync mirrors and publish them as atomic snapshots",
    long_about = None,
)]
struct Cli {
    /// Config file (default: <config_dir>/mirrorkit/worker.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync job for a mirror, retrying per its policy.
    Run(RunArgs),

    /// List a mirror's snapshots and the one being served.
    Snapshots(SnapshotsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    match cli.command {
        Commands::Run(args) => args.run(&config_path),
        Commands::Snapshots(args) => args.run(&config_path),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
