//! Error types for the worker configuration.

use std::path::PathBuf;

use mirrorkit_snapshot::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file not found at {path}")]
    NotFound { path: PathBuf },

    /// YAML parse error, with the file path and serde_yaml's line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine the user config directory; pass --config")]
    ConfigDirNotFound,

    #[error("mirror '{name}' is configured more than once")]
    DuplicateMirror { name: String },

    #[error("mirror '{name}' has an empty command")]
    EmptyCommand { name: String },

    #[error("no mirror named '{name}' in the config")]
    UnknownMirror { name: String },

    #[error("mirror '{name}' does not use snapshots")]
    NoSnapshots { name: String },

    #[error("snapshot setup failed: {0}")]
    Snapshot(#[from] SnapshotError),
}
