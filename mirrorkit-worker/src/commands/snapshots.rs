//! `mirrorkit-worker snapshots`: list a mirror's snapshots.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crate::config;
use crate::error::ConfigError;

/// Arguments for `mirrorkit-worker snapshots`.
#[derive(Args, Debug)]
pub struct SnapshotsArgs {
    /// Name of the mirror.
    pub mirror: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct SnapshotRow {
    name: String,
    epoch: i64,
    created: Option<DateTime<Utc>>,
    served: bool,
}

#[derive(Serialize)]
struct SnapshotListJson {
    mirror: String,
    served: Option<PathBuf>,
    snapshots: Vec<SnapshotRow>,
}

#[derive(Tabled)]
struct SnapshotTableRow {
    #[tabled(rename = "")]
    marker: String,
    #[tabled(rename = "snapshot")]
    name: String,
    #[tabled(rename = "created")]
    created: String,
}

impl SnapshotsArgs {
    pub fn run(self, config_path: &Path) -> Result<()> {
        let config = config::load_at(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        let mirror = config.mirror(&self.mirror)?;
        let (_, layout) = config
            .snapshot_for(mirror)
            .ok_or_else(|| ConfigError::NoSnapshots {
                name: self.mirror.clone(),
            })?;

        let served = layout.served().context("failed to read serve link")?;
        let rows: Vec<SnapshotRow> = layout
            .snapshots()
            .context("failed to list snapshots")?
            .into_iter()
            .map(|entry| SnapshotRow {
                served: served.as_deref() == Some(layout.snapshot(&entry.name).as_path()),
                created: DateTime::from_timestamp(entry.epoch, 0),
                epoch: entry.epoch,
                name: entry.name,
            })
            .collect();

        if self.json {
            let payload = SnapshotListJson {
                mirror: self.mirror,
                served,
                snapshots: rows,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize snapshot JSON")?
            );
            return Ok(());
        }

        print_table(&self.mirror, served.as_deref(), rows);
        Ok(())
    }
}

fn print_table(mirror: &str, served: Option<&Path>, rows: Vec<SnapshotRow>) {
    match served {
        Some(path) => println!("{} serves {}", mirror.bold(), path.display()),
        None => println!("{} has no published snapshot", mirror.bold()),
    }
    if rows.is_empty() {
        println!("No snapshots.");
        return;
    }

    let table_rows: Vec<SnapshotTableRow> = rows
        .into_iter()
        .map(|row| SnapshotTableRow {
            marker: if row.served {
                "■".green().bold().to_string()
            } else {
                String::new()
            },
            name: row.name,
            created: row
                .created
                .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}
