//! Symlink publication.
//!
//! The live link is never rewritten in place: a new link is created under a
//! staging name and renamed over it, so readers see either the old or the
//! new target.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};

use crate::error::{io_err, SnapshotError};
use crate::primitive::LinkStyle;

/// Target to store in `link` so that it resolves to `dest`.
pub fn link_target(style: LinkStyle, link: &Path, dest: &Path) -> PathBuf {
    match style {
        LinkStyle::Absolute => dest.to_path_buf(),
        LinkStyle::Relative => {
            let dir = link.parent().unwrap_or(Path::new(""));
            relative_path(dir, dest).unwrap_or_else(|| dest.to_path_buf())
        }
    }
}

/// Point `link` at `target` by renaming a freshly created link over it.
pub fn swap_symlink(target: &Path, link: &Path) -> Result<(), SnapshotError> {
    let tmp = staging_path(link);
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::error!(path = %tmp.display(), error = %e, "failed to remove stale staging link");
            return Err(io_err(&tmp, e));
        }
    }

    symlink(target, &tmp).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, link) {
        let _ = fs::remove_file(&tmp);
        tracing::error!(path = %link.display(), error = %e, "failed to rename staging link");
        return Err(io_err(link, e));
    }

    tracing::info!(link = %link.display(), target = %target.display(), "updated symlink");
    Ok(())
}

fn staging_path(link: &Path) -> PathBuf {
    let mut name: OsString = link.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Path of `to` relative to directory `from`, computed lexically.
///
/// `None` when one path is absolute and the other is not, or when `from`
/// climbs with `..`.
pub fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    if from.is_absolute() != to.is_absolute() {
        return None;
    }
    let from: Vec<Component> = from
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let to: Vec<Component> = to
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if from.iter().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    Some(rel)
}
