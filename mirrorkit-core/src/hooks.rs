//! Lifecycle hooks around a sync attempt.
//!
//! Every hook registered on a provider is called at five points:
//!
//! ```text
//! pre-job ─► pre-exec ─► [process] ─► post-exec ─┬─► post-success
//! (until it succeeds)                            └─► post-fail
//! ```
//!
//! All phases, pre and post alike, call hooks in registration order. The
//! first error stops the phase; hooks after it are not called.

use std::fmt;

use crate::error::{HookError, JobError};
use crate::provider::MirrorProvider;

/// Call point in the attempt lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreJob,
    PreExec,
    PostExec,
    PostSuccess,
    PostFail,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreJob => write!(f, "pre-job"),
            Phase::PreExec => write!(f, "pre-exec"),
            Phase::PostExec => write!(f, "post-exec"),
            Phase::PostSuccess => write!(f, "post-success"),
            Phase::PostFail => write!(f, "post-fail"),
        }
    }
}

/// Sandboxing role of a hook.
///
/// Providers keep a direct reference to at most one hook of each kind so
/// other hooks can ask whether the sync process is confined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Cgroup,
    Docker,
}

/// A participant in the attempt lifecycle.
///
/// Every operation defaults to a no-op so implementations only spell out the
/// phases they care about.
pub trait JobHook: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// `Some` for cgroup/docker isolation hooks.
    fn isolation(&self) -> Option<Isolation> {
        None
    }

    /// Once per job. Retried on the next attempt until it succeeds; the
    /// process never runs before it has.
    fn pre_job(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        Ok(())
    }

    /// Before every attempt, retries included.
    fn pre_exec(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        Ok(())
    }

    /// Right after the process exits, whatever the outcome.
    fn post_exec(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        Ok(())
    }

    /// After an exit code in the provider's success set.
    fn post_success(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        Ok(())
    }

    /// After any other exit, termination included.
    fn post_fail(&self, _provider: &dyn MirrorProvider) -> Result<(), HookError> {
        Ok(())
    }
}

/// Invoke `phase` on a single hook.
pub fn call_hook(
    hook: &dyn JobHook,
    phase: Phase,
    provider: &dyn MirrorProvider,
) -> Result<(), HookError> {
    match phase {
        Phase::PreJob => hook.pre_job(provider),
        Phase::PreExec => hook.pre_exec(provider),
        Phase::PostExec => hook.post_exec(provider),
        Phase::PostSuccess => hook.post_success(provider),
        Phase::PostFail => hook.post_fail(provider),
    }
}

/// Run `phase` across the provider's hooks in registration order, stopping
/// at the first failure.
pub fn run_phase(provider: &dyn MirrorProvider, phase: Phase) -> Result<(), JobError> {
    for hook in provider.hooks() {
        tracing::debug!(mirror = %provider.name(), hook = %hook.name(), %phase, "calling hook");
        if let Err(source) = call_hook(hook.as_ref(), phase, provider) {
            tracing::error!(
                mirror = %provider.name(),
                hook = %hook.name(),
                %phase,
                error = %source,
                "hook failed",
            );
            return Err(JobError::Hook {
                phase,
                hook: hook.name().to_string(),
                source,
            });
        }
    }
    Ok(())
}
