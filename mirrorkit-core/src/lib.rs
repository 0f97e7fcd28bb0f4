//! mirrorkit core: provider lifecycle, hook pipeline and process execution.
//!
//! - [`context`]: scoped key/value store for per-attempt paths
//! - [`process`]: spawn / wait / terminate one sync process
//! - [`hooks`]: [`JobHook`] trait and phase pipeline
//! - [`provider`]: [`BaseProvider`], [`MirrorProvider`], [`CommandProvider`]
//! - [`job`]: [`SyncJob`] attempt driver
//! - [`config`]: serializable worker and mirror settings

pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod job;
pub mod process;
pub mod provider;

pub use config::{GlobalConfig, MirrorConfig};
pub use context::Context;
pub use error::{ContextError, HookError, JobError, ProviderError};
pub use hooks::{Isolation, JobHook, Phase};
pub use job::{AttemptOutcome, SyncJob};
pub use process::{CmdJob, CommandSpec};
pub use provider::{
    BaseProvider, CommandProvider, CommandSettings, LogMode, MirrorProvider, ProviderSettings,
};
