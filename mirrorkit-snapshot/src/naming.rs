//! Snapshot entry names: `@<unix-epoch-seconds>` plus the `base` seed.

use std::fs;
use std::path::Path;

use crate::error::{io_err, SnapshotError};

/// Name of the seed snapshot every numbered snapshot descends from.
pub const BASE_NAME: &str = "base";

/// A well-formed numbered snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub epoch: i64,
}

impl SnapshotEntry {
    pub fn new(epoch: i64) -> Self {
        Self {
            name: snapshot_name(epoch),
            epoch,
        }
    }
}

pub fn snapshot_name(epoch: i64) -> String {
    format!("@{epoch}")
}

/// Epoch of `@<digits>`; `None` for anything else.
pub fn parse_snapshot_name(name: &str) -> Option<i64> {
    let digits = name.strip_prefix('@')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Well-formed snapshots in `dir`, newest first. Other entries are skipped.
pub fn list_snapshots(dir: &Path) -> Result<Vec<SnapshotEntry>, SnapshotError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        match parse_snapshot_name(name) {
            Some(epoch) => entries.push(SnapshotEntry {
                name: name.to_string(),
                epoch,
            }),
            None if name.starts_with('@') => {
                tracing::debug!(dir = %dir.display(), entry = name, "ignoring malformed snapshot name");
            }
            None => {}
        }
    }
    entries.sort_by(|a, b| b.epoch.cmp(&a.epoch));
    Ok(entries)
}

/// Epoch for a new snapshot: `now`, or one past `latest` when the clock has
/// not moved beyond it. Saturates at `i64::MAX`.
pub fn next_epoch(now: i64, latest: Option<i64>) -> i64 {
    match latest {
        Some(latest) if latest >= now => latest.saturating_add(1),
        _ => now,
    }
}
