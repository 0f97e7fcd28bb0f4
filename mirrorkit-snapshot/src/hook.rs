//! The publish state machine.
//!
//! Per mirror there is at most one mutable working snapshot. A successful
//! attempt freezes it into a new `@<epoch>` snapshot, repoints the serve
//! link at it and removes the working snapshot and every older numbered
//! snapshot. A failed attempt keeps or discards the working snapshot
//! according to [`FailurePolicy`].

use std::fs;
use std::io;
use std::os::unix::fs::{chown, symlink};
use std::path::{Path, PathBuf};

use chrono::Utc;
use mirrorkit_core::{HookError, JobHook, MirrorProvider};

use crate::error::{io_err, SnapshotError};
use crate::layout::SnapshotLayout;
use crate::naming::{next_epoch, SnapshotEntry};
use crate::primitive::SnapshotPrimitive;
use crate::publish::{link_target, swap_symlink};
use crate::settings::{FailurePolicy, Placement};

/// Source of unix-epoch seconds for new snapshot names.
pub type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookOptions {
    pub placement: Placement,
    pub on_failure: FailurePolicy,
    /// Owner given to created directories and the working snapshot.
    pub uid: u32,
    pub gid: u32,
}

pub struct SnapshotHook<P> {
    mirror: String,
    hook_name: String,
    primitive: P,
    layout: SnapshotLayout,
    options: HookOptions,
    clock: Clock,
}

impl<P: SnapshotPrimitive> SnapshotHook<P> {
    /// Validate `options` and initialise the mirror's trees.
    pub fn new(
        mirror: impl Into<String>,
        primitive: P,
        layout: SnapshotLayout,
        options: HookOptions,
    ) -> Result<Self, SnapshotError> {
        Self::with_clock(mirror, primitive, layout, options, || Utc::now().timestamp())
    }

    /// Like [`new`](Self::new) with a custom clock for snapshot names.
    pub fn with_clock(
        mirror: impl Into<String>,
        primitive: P,
        layout: SnapshotLayout,
        options: HookOptions,
        clock: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self, SnapshotError> {
        if options.placement == Placement::PerJob && options.on_failure == FailurePolicy::Discard {
            return Err(SnapshotError::InvalidSettings(
                "on_failure: discard requires placement: per-exec".into(),
            ));
        }

        let hook = Self {
            mirror: mirror.into(),
            hook_name: format!("{}-snapshot", primitive.label()),
            primitive,
            layout,
            options,
            clock: Box::new(clock),
        };
        hook.initialize()?;
        Ok(hook)
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Well-formed snapshots, newest first.
    pub fn snapshots(&self) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        self.layout.snapshots()
    }

    /// Snapshot currently published through the serve link.
    pub fn served(&self) -> Result<Option<PathBuf>, SnapshotError> {
        self.layout.served()
    }

    // -----------------------------------------------------------------------
    // Initialisation
    // -----------------------------------------------------------------------

    fn initialize(&self) -> Result<(), SnapshotError> {
        self.ensure_dir(&self.layout.snapshot_dir)?;
        for path in [&self.layout.working_dir, &self.layout.serve_dir] {
            if let Some(parent) = path.parent() {
                self.ensure_dir(parent)?;
            }
        }

        self.ensure_base()?;
        let latest = self.resolve_latest()?;

        if !entry_exists(&self.layout.serve_dir)? {
            let dest = self.layout.snapshot(&latest.name);
            let target = link_target(self.primitive.link_style(), &self.layout.serve_dir, &dest);
            swap_symlink(&target, &self.layout.serve_dir)?;
        }
        self.ensure_public_link()
    }

    fn ensure_dir(&self, path: &Path) -> Result<(), SnapshotError> {
        if path.exists() {
            return Ok(());
        }
        fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
        self.chown(path);
        Ok(())
    }

    fn chown(&self, path: &Path) {
        let HookOptions { uid, gid, .. } = self.options;
        if let Err(err) = chown(path, Some(uid), Some(gid)) {
            tracing::warn!(mirror = %self.mirror, path = %path.display(), uid, gid, error = %err, "failed to chown");
        }
    }

    fn ensure_base(&self) -> Result<(), SnapshotError> {
        let base = self.layout.base();
        if entry_exists(&base)? {
            if !self.primitive.is_snapshot(&base)? {
                tracing::error!(mirror = %self.mirror, path = %base.display(), "base exists but is not a snapshot");
                return Err(SnapshotError::NotSnapshot { path: base });
            }
            return Ok(());
        }
        self.primitive.create_seed(&base)?;
        self.chown(&base);
        Ok(())
    }

    /// Latest numbered snapshot, seeding one from `base` when none exists.
    fn resolve_latest(&self) -> Result<SnapshotEntry, SnapshotError> {
        if let Some(latest) = self.layout.snapshots()?.into_iter().next() {
            return Ok(latest);
        }

        self.ensure_base()?;
        let entry = SnapshotEntry::new((self.clock)());
        self.primitive
            .clone_snapshot(&self.layout.base(), &self.layout.snapshot(&entry.name), true)?;
        tracing::info!(mirror = %self.mirror, snapshot = %entry.name, "seeded snapshot from base");
        Ok(entry)
    }

    fn ensure_public_link(&self) -> Result<(), SnapshotError> {
        let public = &self.layout.public_dir;
        match fs::symlink_metadata(public) {
            Ok(meta) if meta.file_type().is_symlink() => Ok(()),
            Ok(_) => {
                tracing::warn!(mirror = %self.mirror, path = %public.display(), "public path is not a symlink, leaving it alone");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = public.parent() {
                    self.ensure_dir(parent)?;
                }
                let target = link_target(self.primitive.link_style(), public, &self.layout.serve_dir);
                symlink(&target, public).map_err(|e| io_err(public, e))?;
                tracing::info!(mirror = %self.mirror, link = %public.display(), target = %target.display(), "created public link");
                Ok(())
            }
            Err(e) => Err(io_err(public, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// NO_WORKING → WORKING, or resume an existing working snapshot.
    fn prepare_working(&self) -> Result<(), SnapshotError> {
        let working = &self.layout.working_dir;
        if entry_exists(working)? {
            if self.options.placement == Placement::PerExec && !self.primitive.is_snapshot(working)? {
                tracing::error!(mirror = %self.mirror, path = %working.display(), "working path is not a snapshot");
                return Err(SnapshotError::NotSnapshot {
                    path: working.clone(),
                });
            }
            tracing::info!(mirror = %self.mirror, path = %working.display(), "working snapshot exists, resuming");
            return Ok(());
        }

        let latest = self.resolve_latest()?;
        self.primitive
            .clone_snapshot(&self.layout.snapshot(&latest.name), working, false)?;
        self.chown(working);
        Ok(())
    }

    /// WORKING → NO_WORKING with the serve link moved to a new snapshot.
    fn publish(&self) -> Result<(), SnapshotError> {
        let working = &self.layout.working_dir;
        let latest = self.layout.snapshots()?.first().map(|entry| entry.epoch);
        let now = (self.clock)();
        let epoch = next_epoch(now, latest);
        if epoch != now {
            tracing::warn!(mirror = %self.mirror, now, epoch, "snapshot name already taken, bumping epoch");
        }

        let entry = SnapshotEntry::new(epoch);
        let dest = self.layout.snapshot(&entry.name);
        if entry_exists(&dest)? {
            return Err(io_err(&dest, io::Error::from(io::ErrorKind::AlreadyExists)));
        }
        if let Err(err) = self.primitive.clone_snapshot(working, &dest, true) {
            if entry_exists(&dest).unwrap_or(false) {
                if let Err(cleanup) = self.primitive.delete_snapshot(&dest) {
                    tracing::warn!(mirror = %self.mirror, path = %dest.display(), error = %cleanup, "failed to remove partial snapshot");
                }
            }
            return Err(err);
        }

        let target = link_target(self.primitive.link_style(), &self.layout.serve_dir, &dest);
        swap_symlink(&target, &self.layout.serve_dir)?;
        tracing::info!(mirror = %self.mirror, snapshot = %entry.name, "published snapshot");

        if let Err(err) = self.primitive.delete_snapshot(working) {
            tracing::warn!(mirror = %self.mirror, path = %working.display(), error = %err, "failed to delete working snapshot");
        }
        self.prune(&entry.name);
        Ok(())
    }

    /// Delete numbered snapshots other than `keep`. Failures are logged only.
    fn prune(&self, keep: &str) {
        let entries = match self.layout.snapshots() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(mirror = %self.mirror, error = %err, "failed to list snapshots for cleanup");
                return;
            }
        };

        for entry in entries.iter().filter(|entry| entry.name != keep) {
            let path = self.layout.snapshot(&entry.name);
            match self.primitive.is_snapshot(&path) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(mirror = %self.mirror, path = %path.display(), "not a snapshot, skipping cleanup");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(mirror = %self.mirror, path = %path.display(), error = %err, "failed to inspect old snapshot");
                    continue;
                }
            }
            tracing::info!(mirror = %self.mirror, path = %path.display(), "deleting old snapshot");
            if let Err(err) = self.primitive.delete_snapshot(&path) {
                tracing::warn!(mirror = %self.mirror, path = %path.display(), error = %err, "failed to delete old snapshot");
            }
        }
    }

    fn discard_working(&self) -> Result<(), SnapshotError> {
        let working = &self.layout.working_dir;
        if !entry_exists(working)? {
            return Ok(());
        }
        self.primitive.delete_snapshot(working)?;
        tracing::info!(mirror = %self.mirror, path = %working.display(), "discarded working snapshot");
        Ok(())
    }

    fn check_provider(&self, provider: &dyn MirrorProvider) {
        let working_dir = provider.working_dir();
        if working_dir != self.layout.working_dir {
            tracing::warn!(
                mirror = %self.mirror,
                provider_dir = %working_dir.display(),
                snapshot_dir = %self.layout.working_dir.display(),
                "provider does not sync into the working snapshot"
            );
        }
    }
}

impl<P: SnapshotPrimitive + 'static> JobHook for SnapshotHook<P> {
    fn name(&self) -> &str {
        &self.hook_name
    }

    fn pre_job(&self, provider: &dyn MirrorProvider) -> Result<(), HookError> {
        self.check_provider(provider);
        if self.options.placement == Placement::PerJob {
            self.prepare_working()?;
        }
        Ok(())
    }

    fn pre_exec(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        if self.options.placement == Placement::PerExec {
            self.prepare_working()?;
        }
        Ok(())
    }

    fn post_success(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        self.publish()?;
        Ok(())
    }

    fn post_fail(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        match self.options.on_failure {
            FailurePolicy::Resume => {
                tracing::info!(mirror = %self.mirror, path = %self.layout.working_dir.display(), "keeping working snapshot for the next attempt");
            }
            FailurePolicy::Discard => self.discard_working()?,
        }
        Ok(())
    }
}

/// `true` when anything, a dangling symlink included, occupies `path`.
fn entry_exists(path: &Path) -> Result<bool, SnapshotError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_err(path, e)),
    }
}
