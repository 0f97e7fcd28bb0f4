//! One-shot job runner: drives a provider's attempts on the blocking pool,
//! applying its retry and timeout policy and cancelling on shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mirrorkit_core::{AttemptOutcome, MirrorProvider, SyncJob};
use tokio::task::{JoinError, JoinHandle};

/// How often a cancelled attempt is asked again to terminate while its hooks
/// are still running.
const TERMINATE_INTERVAL: Duration = Duration::from_millis(100);

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub attempts: u32,
    pub succeeded: bool,
    /// Shutdown was requested while the job ran.
    pub interrupted: bool,
    /// Why the last failed attempt failed.
    pub last_error: Option<String>,
}

/// Run attempts until one succeeds, `retry` attempts have been made, or
/// `shutdown` resolves.
pub async fn run_job<F>(provider: Arc<dyn MirrorProvider>, shutdown: F) -> Result<JobReport>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let max_attempts = provider.retry().max(1);
    let timeout = provider.timeout();
    let mut job = SyncJob::new(Arc::clone(&provider));
    let mut report = JobReport {
        attempts: 0,
        succeeded: false,
        interrupted: false,
        last_error: None,
    };

    while report.attempts < max_attempts {
        let mut attempt = tokio::task::spawn_blocking(move || {
            let result = job.run_attempt();
            (job, result)
        });

        let joined = tokio::select! {
            joined = &mut attempt => joined,
            _ = expiry(timeout) => {
                tracing::warn!(mirror = %provider.name(), timeout = ?timeout, "attempt timed out, terminating");
                cancel(&provider, &mut attempt).await
            }
            _ = &mut shutdown => {
                tracing::info!(mirror = %provider.name(), "shutdown requested, terminating");
                report.interrupted = true;
                cancel(&provider, &mut attempt).await
            }
        };
        let (returned, result) = joined.context("sync attempt task panicked")?;
        job = returned;
        report.attempts = job.attempts();

        match result {
            Ok(AttemptOutcome::Succeeded) => {
                report.succeeded = true;
                report.last_error = None;
                break;
            }
            Ok(AttemptOutcome::Failed(reason)) => report.last_error = Some(reason.to_string()),
            Err(err) => report.last_error = Some(err.to_string()),
        }
        if report.interrupted {
            break;
        }
    }

    Ok(report)
}

async fn expiry(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Terminate the provider until the attempt task finishes. A single call is
/// not enough when the attempt is between `start` and launch.
async fn cancel<T>(provider: &Arc<dyn MirrorProvider>, attempt: &mut JoinHandle<T>) -> Result<T, JoinError> {
    loop {
        terminate(provider).await;
        tokio::select! {
            joined = &mut *attempt => return joined,
            _ = tokio::time::sleep(TERMINATE_INTERVAL) => {}
        }
    }
}

async fn terminate(provider: &Arc<dyn MirrorProvider>) {
    let provider = Arc::clone(provider);
    let name = provider.name().to_string();
    match tokio::task::spawn_blocking(move || provider.terminate()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(mirror = %name, error = %err, "terminate failed"),
        Err(err) => tracing::error!(mirror = %name, error = %err, "terminate task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorkit_core::{BaseProvider, CommandProvider, CommandSettings, HookError, JobHook, ProviderSettings};
    use tempfile::TempDir;

    fn provider(dir: &TempDir, script: &str, retry: u32, timeout: Option<Duration>) -> Arc<dyn MirrorProvider> {
        command_provider(dir, script, retry, timeout, None)
    }

    fn command_provider(
        dir: &TempDir,
        script: &str,
        retry: u32,
        timeout: Option<Duration>,
        hook: Option<Arc<dyn JobHook>>,
    ) -> Arc<dyn MirrorProvider> {
        let working = dir.path().join("data");
        std::fs::create_dir_all(&working).unwrap();
        let mut settings = ProviderSettings::new("debian", working, dir.path().join("log"));
        settings.retry = retry;
        settings.timeout = timeout;
        let mut provider = CommandProvider::new(
            BaseProvider::new(settings).with_terminate_grace(Duration::from_millis(200)),
            CommandSettings {
                command: "/bin/sh".into(),
                args: vec!["-c".into(), script.into()],
                ..CommandSettings::default()
            },
        );
        if let Some(hook) = hook {
            provider.add_hook(hook);
        }
        Arc::new(provider)
    }

    /// A `pre-exec` hook that takes a while, like cloning a large tree.
    struct SlowPrepare(Duration);

    impl JobHook for SlowPrepare {
        fn name(&self) -> &str {
            "slow-prepare"
        }

        fn pre_exec(&self, _: &dyn MirrorProvider) -> Result<(), HookError> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_at_first_success() {
        let dir = TempDir::new().unwrap();
        // Fails once, then succeeds.
        let script = "if [ -f seen ]; then exit 0; else touch seen; exit 1; fi";
        let report = run_job(provider(&dir, script, 5, None), std::future::pending())
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
        assert!(report.succeeded);
        assert_eq!(report.last_error, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn gives_up_after_retry_attempts() {
        let dir = TempDir::new().unwrap();
        let report = run_job(provider(&dir, "exit 7", 3, None), std::future::pending())
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
        assert!(!report.succeeded);
        assert_eq!(report.last_error.as_deref(), Some("process exited with code 7"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_terminates_each_attempt() {
        let dir = TempDir::new().unwrap();
        let report = run_job(
            provider(&dir, "sleep 30", 2, Some(Duration::from_millis(500))),
            std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(report.attempts, 2);
        assert!(!report.succeeded);
        assert!(!report.interrupted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_cancels_without_retrying() {
        let dir = TempDir::new().unwrap();
        let shutdown = tokio::time::sleep(Duration::from_millis(500));
        let report = run_job(provider(&dir, "sleep 30", 5, None), shutdown)
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert!(report.interrupted);
        assert!(!report.succeeded);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_during_slow_hook_prevents_launch() {
        let dir = TempDir::new().unwrap();
        let provider = command_provider(
            &dir,
            "touch ran; sleep 30",
            1,
            Some(Duration::from_millis(300)),
            Some(Arc::new(SlowPrepare(Duration::from_secs(1)))),
        );

        let begun = std::time::Instant::now();
        let report = run_job(provider, std::future::pending()).await.unwrap();
        assert!(begun.elapsed() < Duration::from_secs(10), "sync must not run unbounded");
        assert_eq!(report.attempts, 1);
        assert!(!report.succeeded);
        assert!(report.last_error.unwrap().contains("cancelled before launch"));
        assert!(!dir.path().join("data").join("ran").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_during_slow_hook_prevents_launch() {
        let dir = TempDir::new().unwrap();
        let provider = command_provider(
            &dir,
            "touch ran; sleep 30",
            5,
            None,
            Some(Arc::new(SlowPrepare(Duration::from_secs(1)))),
        );

        let shutdown = tokio::time::sleep(Duration::from_millis(300));
        let report = run_job(provider, shutdown).await.unwrap();
        assert_eq!(report.attempts, 1);
        assert!(report.interrupted);
        assert!(!dir.path().join("data").join("ran").exists());
    }
}
