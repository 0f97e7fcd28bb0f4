//! Native btrfs subvolumes via the `btrfs` command line tool.
//!
//! The worker user must be allowed to run `btrfs subvolume` on the managed
//! filesystem (typically `user_subvol_rm_allowed` plus ownership of the
//! roots).

use std::ffi::OsString;
use std::path::Path;

use crate::error::SnapshotError;
use crate::primitive::{run_tool, LinkStyle, SnapshotPrimitive};

pub const DEFAULT_BTRFS_BIN: &str = "btrfs";

#[derive(Debug, Clone)]
pub struct BtrfsPrimitive {
    bin: String,
}

impl Default for BtrfsPrimitive {
    fn default() -> Self {
        Self::new(DEFAULT_BTRFS_BIN)
    }
}

impl BtrfsPrimitive {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn create_args(path: &Path) -> Vec<OsString> {
        vec!["subvolume".into(), "create".into(), path.into()]
    }

    pub fn snapshot_args(from: &Path, to: &Path, read_only: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["subvolume".into(), "snapshot".into()];
        if read_only {
            args.push("-r".into());
        }
        args.push(from.into());
        args.push(to.into());
        args
    }

    pub fn delete_args(path: &Path) -> Vec<OsString> {
        vec!["subvolume".into(), "delete".into(), path.into()]
    }

    pub fn show_args(path: &Path) -> Vec<OsString> {
        vec!["subvolume".into(), "show".into(), path.into()]
    }
}

impl SnapshotPrimitive for BtrfsPrimitive {
    fn label(&self) -> &'static str {
        "btrfs"
    }

    fn create_seed(&self, path: &Path) -> Result<(), SnapshotError> {
        run_tool(&self.bin, Self::create_args(path))?;
        tracing::info!(path = %path.display(), "created btrfs subvolume");
        Ok(())
    }

    fn clone_snapshot(&self, from: &Path, to: &Path, read_only: bool) -> Result<(), SnapshotError> {
        run_tool(&self.bin, Self::snapshot_args(from, to, read_only))?;
        tracing::info!(from = %from.display(), to = %to.display(), read_only, "created btrfs snapshot");
        Ok(())
    }

    fn delete_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        run_tool(&self.bin, Self::delete_args(path))?;
        tracing::info!(path = %path.display(), "deleted btrfs subvolume");
        Ok(())
    }

    fn is_snapshot(&self, path: &Path) -> Result<bool, SnapshotError> {
        if !path.is_dir() {
            return Ok(false);
        }
        match run_tool(&self.bin, Self::show_args(path)) {
            Ok(()) => Ok(true),
            // `show` fails on plain directories.
            Err(SnapshotError::Command { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn link_style(&self) -> LinkStyle {
        LinkStyle::Relative
    }
}
