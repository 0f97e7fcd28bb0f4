//! On-disk layout of one mirror's snapshot trees.
//!
//! ```text
//! <fs_path>/<serve_prefix>/<dir>        symlink to the published @<epoch>
//! <fs_path>/<working_prefix>/<dir>      mutable snapshot under sync
//! <fs_path>/<snapshot_prefix>/<dir>/    base, @<epoch>...
//! <mirror_dir>/<name>                   public symlink to the serve link
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{io_err, SnapshotError};
use crate::naming::{list_snapshots, SnapshotEntry, BASE_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    /// `<mirror_dir>/<name>`, what the web server exposes.
    pub public_dir: PathBuf,
    pub serve_dir: PathBuf,
    pub working_dir: PathBuf,
    pub snapshot_dir: PathBuf,
}

impl SnapshotLayout {
    pub fn base(&self) -> PathBuf {
        self.snapshot_dir.join(BASE_NAME)
    }

    pub fn snapshot(&self, name: &str) -> PathBuf {
        self.snapshot_dir.join(name)
    }

    /// Well-formed snapshots, newest first.
    pub fn snapshots(&self) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        list_snapshots(&self.snapshot_dir)
    }

    /// Snapshot the serve link currently resolves to, or `None` when the
    /// link is missing.
    pub fn served(&self) -> Result<Option<PathBuf>, SnapshotError> {
        match fs::read_link(&self.serve_dir) {
            Ok(target) if target.is_relative() => {
                let parent = self.serve_dir.parent().unwrap_or(Path::new(""));
                Ok(Some(normalize(&parent.join(target))))
            }
            Ok(target) => Ok(Some(target)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&self.serve_dir, e)),
        }
    }
}

/// Lexically fold `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn layout(root: &Path) -> SnapshotLayout {
        SnapshotLayout {
            public_dir: root.join("www").join("debian"),
            serve_dir: root.join("serve").join("debian"),
            working_dir: root.join("working").join("debian"),
            snapshot_dir: root.join("snapshot").join("debian"),
        }
    }

    #[test]
    fn derived_paths() {
        let l = layout(Path::new("/cow"));
        assert_eq!(l.base(), PathBuf::from("/cow/snapshot/debian/base"));
        assert_eq!(l.snapshot("@7"), PathBuf::from("/cow/snapshot/debian/@7"));
    }

    #[test]
    fn served_resolves_relative_links() {
        let dir = TempDir::new().unwrap();
        let l = layout(dir.path());
        fs::create_dir_all(l.snapshot("@7")).unwrap();
        fs::create_dir_all(l.serve_dir.parent().unwrap()).unwrap();
        assert_eq!(l.served().unwrap(), None);

        symlink("../snapshot/debian/@7", &l.serve_dir).unwrap();
        assert_eq!(l.served().unwrap(), Some(l.snapshot("@7")));
    }
}
