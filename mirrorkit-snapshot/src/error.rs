//! Error types for mirrorkit-snapshot.

use std::path::PathBuf;

use mirrorkit_core::HookError;
use thiserror::Error;

/// All errors that can arise while managing a mirror's snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot tool could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot tool ran but reported failure.
    #[error("'{command}' failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    /// A path that must hold a snapshot holds something else.
    #[error("{path} is not a snapshot")]
    NotSnapshot { path: PathBuf },

    /// Settings that cannot produce a consistent state machine.
    #[error("invalid snapshot settings: {0}")]
    InvalidSettings(String),
}

impl From<SnapshotError> for HookError {
    fn from(err: SnapshotError) -> Self {
        HookError::new(err)
    }
}

/// Convenience constructor for [`SnapshotError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.into(),
        source,
    }
}
