//! Attempt driver: runs one provider through the hook phases.
//!
//! A [`SyncJob`] represents one scheduled job of a mirror. The scheduler
//! calls [`SyncJob::run_attempt`] once per try. `pre-job` hooks fire until
//! they succeed once, everything else on every attempt.
//!
//! The provider is started (log file opened, running flag set) before any
//! hook runs, so a log file that cannot be opened aborts the attempt with
//! nothing touched. Once the pre hooks have run, every attempt ends in a
//! post phase, including one whose process could not be launched.

use std::sync::mpsc;
use std::sync::Arc;

use crate::context::ATTEMPT_KEY;
use crate::error::{JobError, ProviderError};
use crate::hooks::{run_phase, Phase};
use crate::provider::{LogMode, MirrorProvider};

/// How an attempt whose process ran to completion ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Exit code in the success set; `post-success` hooks all passed.
    Succeeded,
    /// Non-success exit, termination, or failure to observe the process;
    /// `post-fail` hooks all passed.
    Failed(ProviderError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// One job of one mirror, possibly spanning several attempts.
pub struct SyncJob {
    provider: Arc<dyn MirrorProvider>,
    attempts: u32,
    pre_job_done: bool,
}

impl SyncJob {
    pub fn new(provider: Arc<dyn MirrorProvider>) -> Self {
        Self {
            provider,
            attempts: 0,
            pre_job_done: false,
        }
    }

    pub fn provider(&self) -> &Arc<dyn MirrorProvider> {
        &self.provider
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run one attempt to completion.
    ///
    /// `Err` means the attempt was aborted before or after the process ran
    /// (a hook failed, or the process could not be launched). `Ok` carries
    /// the exit classification after the matching post hooks succeeded.
    pub fn run_attempt(&mut self) -> Result<AttemptOutcome, JobError> {
        self.attempts += 1;
        let attempt = self.attempts;
        let provider = self.provider.as_ref();

        provider.base().enter_context();
        provider.base().set_context(ATTEMPT_KEY, attempt);
        tracing::info!(mirror = %provider.name(), attempt, "starting sync attempt");

        let result = Self::drive(provider, attempt, &mut self.pre_job_done);

        provider.base().exit_context();
        match &result {
            Ok(AttemptOutcome::Succeeded) => {
                tracing::info!(mirror = %provider.name(), attempt, "sync attempt succeeded");
            }
            Ok(AttemptOutcome::Failed(reason)) => {
                tracing::warn!(mirror = %provider.name(), attempt, reason = %reason, "sync attempt failed");
            }
            Err(err) => {
                tracing::error!(mirror = %provider.name(), attempt, error = %err, "sync attempt aborted");
            }
        }
        result
    }

    fn drive(
        provider: &dyn MirrorProvider,
        attempt: u32,
        pre_job_done: &mut bool,
    ) -> Result<AttemptOutcome, JobError> {
        let mode = if attempt == 1 {
            LogMode::Truncate
        } else {
            LogMode::Append
        };
        provider.start(mode).map_err(JobError::Launch)?;

        let prepared = Self::prepare(provider, pre_job_done);
        if let Err(err) = prepared {
            provider.base().release();
            return Err(err);
        }

        let (started_tx, started_rx) = mpsc::channel();
        if let Err(err) = provider.run(started_tx) {
            if provider.is_running() {
                // Variant failed before launching: release the log file and
                // clear the running flag.
                provider.base().release();
            }
            Self::finish_unlaunched(provider);
            return Err(JobError::Launch(err));
        }
        // `run` only returns Ok after signalling.
        let _ = started_rx.try_recv();

        let exit = provider.wait();

        run_phase(provider, Phase::PostExec)?;
        match exit {
            Ok(()) => {
                run_phase(provider, Phase::PostSuccess)?;
                Ok(AttemptOutcome::Succeeded)
            }
            Err(reason) => {
                run_phase(provider, Phase::PostFail)?;
                Ok(AttemptOutcome::Failed(reason))
            }
        }
    }

    fn prepare(provider: &dyn MirrorProvider, pre_job_done: &mut bool) -> Result<(), JobError> {
        if !*pre_job_done {
            run_phase(provider, Phase::PreJob)?;
            *pre_job_done = true;
        }
        run_phase(provider, Phase::PreExec)
    }

    /// Post phases for an attempt whose process never ran. The launch error
    /// is what the caller sees; hook errors here are only logged.
    fn finish_unlaunched(provider: &dyn MirrorProvider) {
        for phase in [Phase::PostExec, Phase::PostFail] {
            if let Err(err) = run_phase(provider, phase) {
                tracing::warn!(mirror = %provider.name(), %phase, error = %err, "hook failed after launch failure");
                return;
            }
        }
    }
}
