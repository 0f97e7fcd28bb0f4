//! Clone/delete primitives the snapshot state machine is generic over.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

use crate::error::SnapshotError;

/// How the serve link names its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStyle {
    /// Relative to the link's directory; survives remounting the tree.
    Relative,
    Absolute,
}

/// Copy-on-write operations on one filesystem. All paths are absolute and
/// under the managed roots.
pub trait SnapshotPrimitive: Send + Sync {
    /// Short name used in logs and the hook name.
    fn label(&self) -> &'static str;

    /// Create an empty snapshot at `path`.
    fn create_seed(&self, path: &Path) -> Result<(), SnapshotError>;

    /// Create `to` as a copy-on-write clone of `from`.
    fn clone_snapshot(&self, from: &Path, to: &Path, read_only: bool) -> Result<(), SnapshotError>;

    fn delete_snapshot(&self, path: &Path) -> Result<(), SnapshotError>;

    fn is_snapshot(&self, path: &Path) -> Result<bool, SnapshotError>;

    fn link_style(&self) -> LinkStyle;
}

/// Run `program args...`, turning a non-zero exit into
/// [`SnapshotError::Command`] with the tool's stderr.
pub(crate) fn run_tool<I, S>(program: &str, args: I) -> Result<(), SnapshotError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args);
    let rendered = render(&cmd);
    tracing::debug!(command = %rendered, "running snapshot tool");

    let output = cmd.output().map_err(|source| SnapshotError::Spawn {
        program: program.to_string(),
        source,
    })?;
    if output.status.success() {
        return Ok(());
    }
    Err(SnapshotError::Command {
        command: rendered,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn render(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
