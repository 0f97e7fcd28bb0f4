//! Error types for mirrorkit-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::hooks::Phase;

/// Misuse of the scoped execution context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    /// `exit` was called on the outermost scope.
    #[error("cannot exit the root context scope")]
    ExitRoot,
}

/// Errors raised by a provider while launching, waiting on or cancelling
/// its sync process.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `start` was called while a previous attempt is still in flight.
    #[error("provider '{name}' is already running")]
    AlreadyRunning { name: String },

    /// `run` was called without a prior `start`.
    #[error("provider '{name}' was not started")]
    NotStarted { name: String },

    /// `wait` was called but no process has been launched.
    #[error("provider '{name}' has no launched process")]
    NotLaunched { name: String },

    /// `terminate` arrived before the sync command was launched.
    #[error("sync of '{name}' was cancelled before launch")]
    Cancelled { name: String },

    /// The sync command could not be spawned.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited with a code outside the success set.
    #[error("process exited with code {code}")]
    ExitCode { code: i32 },

    /// The process was killed by a signal.
    #[error("process killed by signal {signal}")]
    Signaled { signal: i32 },

    /// Delivering a signal to the process group failed.
    #[error("failed to send signal {signal} to process group {pid}: {source}")]
    Kill {
        pid: u32,
        signal: i32,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    /// True when the error classifies a finished process rather than a failure
    /// to launch or observe it.
    pub fn is_exit_failure(&self) -> bool {
        matches!(self, Self::ExitCode { .. } | Self::Signaled { .. })
    }
}

/// Error surfaced by a [`JobHook`](crate::hooks::JobHook).
///
/// Hooks live in other crates with their own error enums, so the payload is
/// boxed and displayed transparently.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct HookError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl HookError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(err))
    }

    /// Build a hook error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self(message.into())
    }

    /// Borrow the underlying error for downcasting.
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl From<std::io::Error> for HookError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

/// Errors that abort a sync attempt before its exit could be classified.
#[derive(Debug, Error)]
pub enum JobError {
    /// A hook failed; remaining hooks of the phase were skipped.
    #[error("{phase} hook '{hook}' failed: {source}")]
    Hook {
        phase: Phase,
        hook: String,
        #[source]
        source: HookError,
    },

    /// The provider could not start or launch the process.
    #[error("launch failed: {0}")]
    Launch(#[source] ProviderError),
}

/// Convenience constructor for [`ProviderError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ProviderError {
    ProviderError::Io {
        path: path.into(),
        source,
    }
}
