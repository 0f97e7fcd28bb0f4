//! Deployment settings for the snapshot hook, as read from the worker's
//! configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mirrorkit_core::JobHook;
use serde::{Deserialize, Serialize};

use crate::btrfs::{BtrfsPrimitive, DEFAULT_BTRFS_BIN};
use crate::error::SnapshotError;
use crate::hook::{HookOptions, SnapshotHook};
use crate::juicefs::{default_clone_command, JuicefsPrimitive};
use crate::layout::SnapshotLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Btrfs,
    Juicefs,
}

/// When the working snapshot is provisioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Once per job, in `pre-job`; retries reuse it.
    #[default]
    PerJob,
    /// Before every attempt, in `pre-exec`.
    PerExec,
}

/// What `post-fail` does with the working snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep it so the next attempt continues where this one stopped.
    #[default]
    Resume,
    /// Delete it so the next attempt starts from the latest snapshot.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    #[serde(rename = "type")]
    pub kind: SnapshotKind,
    pub fs_path: PathBuf,
    #[serde(default = "default_serve_prefix")]
    pub serve_prefix: String,
    #[serde(default = "default_working_prefix")]
    pub working_prefix: String,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub btrfs_bin: Option<String>,
    #[serde(default)]
    pub clone_command: Option<Vec<String>>,
}

impl SnapshotSettings {
    /// Paths for the mirror `name` stored under directory `dir`.
    pub fn layout(&self, mirror_dir: &Path, name: &str, dir: &str) -> SnapshotLayout {
        SnapshotLayout {
            public_dir: mirror_dir.join(name),
            serve_dir: self.fs_path.join(&self.serve_prefix).join(dir),
            working_dir: self.fs_path.join(&self.working_prefix).join(dir),
            snapshot_dir: self.fs_path.join(&self.snapshot_prefix).join(dir),
        }
    }

    /// Build and initialise the hook for one mirror.
    pub fn build_hook(
        &self,
        mirror: &str,
        layout: SnapshotLayout,
        uid: u32,
        gid: u32,
    ) -> Result<Arc<dyn JobHook>, SnapshotError> {
        let options = HookOptions {
            placement: self.placement,
            on_failure: self.on_failure,
            uid,
            gid,
        };
        let hook: Arc<dyn JobHook> = match self.kind {
            SnapshotKind::Btrfs => {
                let bin = self.btrfs_bin.as_deref().unwrap_or(DEFAULT_BTRFS_BIN);
                Arc::new(SnapshotHook::new(mirror, BtrfsPrimitive::new(bin), layout, options)?)
            }
            SnapshotKind::Juicefs => {
                let command = self.clone_command.clone().unwrap_or_else(default_clone_command);
                Arc::new(SnapshotHook::new(
                    mirror,
                    JuicefsPrimitive::new(command)?,
                    layout,
                    options,
                )?)
            }
        };
        Ok(hook)
    }
}

fn default_serve_prefix() -> String {
    "serve".to_string()
}

fn default_working_prefix() -> String {
    "working".to_string()
}

fn default_snapshot_prefix() -> String {
    "snapshot".to_string()
}
