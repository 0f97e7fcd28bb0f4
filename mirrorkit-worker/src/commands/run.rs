//! `mirrorkit-worker run`: run one job of a mirror.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::config;
use crate::runner::{self, JobReport};

/// Arguments for `mirrorkit-worker run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Name of the mirror to sync.
    pub mirror: String,
}

impl RunArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = config::load_at(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        let provider = config
            .build_provider(&self.mirror)
            .with_context(|| format!("failed to set up mirror '{}'", self.mirror))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        let report = runtime.block_on(runner::run_job(provider, shutdown_signal()))?;

        print_report(&self.mirror, &report);
        if !report.succeeded {
            bail!("sync of '{}' failed", self.mirror);
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
}

fn print_report(mirror: &str, report: &JobReport) {
    let attempts = match report.attempts {
        1 => "1 attempt".to_string(),
        n => format!("{n} attempts"),
    };
    if report.succeeded {
        println!("✓ '{mirror}' synced ({attempts})");
        return;
    }
    let state = if report.interrupted { "interrupted" } else { "failed" };
    println!("✗ '{mirror}' {state} ({attempts})");
    if let Some(reason) = &report.last_error {
        println!("  last error: {reason}");
    }
}
