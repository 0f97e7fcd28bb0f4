//! Directory clones through an external clone command (`juicefs clone` by
//! default). Any directory counts as a snapshot and deletion is a recursive
//! remove.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{io_err, SnapshotError};
use crate::primitive::{run_tool, LinkStyle, SnapshotPrimitive};

pub fn default_clone_command() -> Vec<String> {
    vec!["juicefs".into(), "clone".into(), "-p".into()]
}

#[derive(Debug, Clone)]
pub struct JuicefsPrimitive {
    clone_command: Vec<String>,
}

impl JuicefsPrimitive {
    /// `clone_command` is invoked as `clone_command... <from> <to>`.
    pub fn new(clone_command: Vec<String>) -> Result<Self, SnapshotError> {
        if clone_command.first().map_or(true, |program| program.is_empty()) {
            return Err(SnapshotError::InvalidSettings(
                "clone_command must name a program".into(),
            ));
        }
        Ok(Self { clone_command })
    }

    pub fn clone_command(&self) -> &[String] {
        &self.clone_command
    }
}

impl SnapshotPrimitive for JuicefsPrimitive {
    fn label(&self) -> &'static str {
        "juicefs"
    }

    fn create_seed(&self, path: &Path) -> Result<(), SnapshotError> {
        fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
        tracing::info!(path = %path.display(), "created seed directory");
        Ok(())
    }

    fn clone_snapshot(&self, from: &Path, to: &Path, read_only: bool) -> Result<(), SnapshotError> {
        let (program, fixed) = self
            .clone_command
            .split_first()
            .ok_or_else(|| SnapshotError::InvalidSettings("empty clone_command".into()))?;
        let args = fixed
            .iter()
            .map(|a| OsStr::new(a.as_str()))
            .chain([from.as_os_str(), to.as_os_str()]);
        run_tool(program, args)?;
        tracing::info!(from = %from.display(), to = %to.display(), read_only, "cloned snapshot directory");
        Ok(())
    }

    fn delete_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        match fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(path, e)),
        }
        tracing::info!(path = %path.display(), "deleted snapshot directory");
        Ok(())
    }

    fn is_snapshot(&self, path: &Path) -> Result<bool, SnapshotError> {
        Ok(path.is_dir())
    }

    fn link_style(&self) -> LinkStyle {
        LinkStyle::Absolute
    }
}
