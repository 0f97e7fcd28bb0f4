//! Attempt driver tests: hook ordering, short-circuiting, exit
//! classification and context scoping.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use mirrorkit_core::{
    AttemptOutcome, BaseProvider, CommandProvider, CommandSettings, HookError, Isolation, JobError,
    JobHook, MirrorProvider, Phase, ProviderError, ProviderSettings, SyncJob,
};
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Calls = Arc<Mutex<Vec<(String, Phase)>>>;

struct Recorder {
    name: String,
    calls: Calls,
    fail_on: Option<Phase>,
}

impl Recorder {
    fn new(name: &str, calls: &Calls) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::clone(calls),
            fail_on: None,
        }
    }

    fn failing(name: &str, calls: &Calls, phase: Phase) -> Self {
        Self {
            fail_on: Some(phase),
            ..Self::new(name, calls)
        }
    }

    fn record(&self, phase: Phase) -> Result<(), HookError> {
        self.calls.lock().unwrap().push((self.name.clone(), phase));
        if self.fail_on == Some(phase) {
            return Err(HookError::msg(format!("{} refused {phase}", self.name)));
        }
        Ok(())
    }
}

impl JobHook for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_job(&self, _: &dyn MirrorProvider) -> Result<(), HookError> {
        self.record(Phase::PreJob)
    }

    fn pre_exec(&self, _: &dyn MirrorProvider) -> Result<(), HookError> {
        self.record(Phase::PreExec)
    }

    fn post_exec(&self, _: &dyn MirrorProvider) -> Result<(), HookError> {
        self.record(Phase::PostExec)
    }

    fn post_success(&self, _: &dyn MirrorProvider) -> Result<(), HookError> {
        self.record(Phase::PostSuccess)
    }

    fn post_fail(&self, _: &dyn MirrorProvider) -> Result<(), HookError> {
        self.record(Phase::PostFail)
    }
}

fn provider(dir: &TempDir, script: &str) -> CommandProvider {
    let working = dir.path().join("data");
    fs::create_dir_all(&working).expect("mkdir working");
    let settings = ProviderSettings::new("tunalinux", working, dir.path().join("log"));
    CommandProvider::new(
        BaseProvider::new(settings),
        CommandSettings {
            command: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            ..CommandSettings::default()
        },
    )
}

fn phases_of(calls: &Calls, hook: &str) -> Vec<Phase> {
    calls
        .lock()
        .unwrap()
        .iter()
        .filter(|(name, _)| name == hook)
        .map(|(_, phase)| *phase)
        .collect()
}

// ---------------------------------------------------------------------------
// 1. Ordering
// ---------------------------------------------------------------------------

#[test]
fn every_phase_runs_hooks_in_registration_order() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "exit 0");
    p.add_hook(Arc::new(Recorder::new("first", &calls)));
    p.add_hook(Arc::new(Recorder::new("second", &calls)));

    let outcome = SyncJob::new(Arc::new(p)).run_attempt().expect("attempt");
    assert!(outcome.is_success());

    let expected: Vec<(String, Phase)> = [
        Phase::PreJob,
        Phase::PreExec,
        Phase::PostExec,
        Phase::PostSuccess,
    ]
    .into_iter()
    .flat_map(|phase| [("first".to_string(), phase), ("second".to_string(), phase)])
    .collect();
    assert_eq!(*calls.lock().unwrap(), expected);
}

#[test]
fn pre_job_runs_only_on_first_attempt() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "exit 1");
    p.add_hook(Arc::new(Recorder::new("hook", &calls)));

    let mut job = SyncJob::new(Arc::new(p));
    for _ in 0..3 {
        let outcome = job.run_attempt().expect("attempt");
        assert!(!outcome.is_success());
    }
    assert_eq!(job.attempts(), 3);

    let phases = phases_of(&calls, "hook");
    assert_eq!(phases.iter().filter(|p| **p == Phase::PreJob).count(), 1);
    assert_eq!(phases.iter().filter(|p| **p == Phase::PreExec).count(), 3);
    assert_eq!(phases.iter().filter(|p| **p == Phase::PostFail).count(), 3);
}

// ---------------------------------------------------------------------------
// 2. Exit classification
// ---------------------------------------------------------------------------

#[rstest]
#[case("exit 0", &[], true)]
#[case("exit 24", &[0, 24], true)]
#[case("exit 24", &[], false)]
#[case("exit 2", &[0, 24], false)]
fn exit_code_selects_post_phase(#[case] script: &str, #[case] codes: &[i32], #[case] success: bool) {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, script);
    p.set_success_exit_codes(codes);
    p.add_hook(Arc::new(Recorder::new("hook", &calls)));

    let outcome = SyncJob::new(Arc::new(p)).run_attempt().expect("attempt");
    assert_eq!(outcome.is_success(), success);

    let last = *phases_of(&calls, "hook").last().expect("post phase ran");
    let expected = if success { Phase::PostSuccess } else { Phase::PostFail };
    assert_eq!(last, expected);
}

#[test]
fn failed_outcome_carries_exit_code() {
    let dir = TempDir::new().unwrap();
    let outcome = SyncJob::new(Arc::new(provider(&dir, "exit 5")))
        .run_attempt()
        .expect("attempt");
    match outcome {
        AttemptOutcome::Failed(ProviderError::ExitCode { code }) => assert_eq!(code, 5),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 3. Short-circuiting
// ---------------------------------------------------------------------------

#[test]
fn failing_pre_exec_hook_skips_later_hooks_and_the_process() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "touch ran");
    p.add_hook(Arc::new(Recorder::failing("gate", &calls, Phase::PreExec)));
    p.add_hook(Arc::new(Recorder::new("after", &calls)));

    let provider: Arc<dyn MirrorProvider> = Arc::new(p);
    let err = SyncJob::new(Arc::clone(&provider)).run_attempt().unwrap_err();
    match &err {
        JobError::Hook { phase, hook, .. } => {
            assert_eq!(*phase, Phase::PreExec);
            assert_eq!(hook, "gate");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(phases_of(&calls, "after"), vec![Phase::PreJob]);
    assert!(!dir.path().join("data").join("ran").exists(), "process must not run");
    assert!(!provider.is_running());
}

#[test]
fn failing_post_success_hook_fails_attempt_without_post_fail() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "exit 0");
    p.add_hook(Arc::new(Recorder::failing("publisher", &calls, Phase::PostSuccess)));
    p.add_hook(Arc::new(Recorder::new("after", &calls)));

    let err = SyncJob::new(Arc::new(p)).run_attempt().unwrap_err();
    assert!(matches!(err, JobError::Hook { phase: Phase::PostSuccess, .. }), "got: {err}");

    let publisher = phases_of(&calls, "publisher");
    assert!(!publisher.contains(&Phase::PostFail));
    assert_eq!(
        phases_of(&calls, "after"),
        vec![Phase::PreJob, Phase::PreExec, Phase::PostExec]
    );
}

// ---------------------------------------------------------------------------
// 4. Launch failures
// ---------------------------------------------------------------------------

#[test]
fn spawn_failure_runs_failure_hooks() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    fs::create_dir_all(dir.path().join("data")).unwrap();
    let mut p = CommandProvider::new(
        BaseProvider::new(ProviderSettings::new(
            "broken",
            dir.path().join("data"),
            dir.path().join("log"),
        )),
        CommandSettings {
            command: "/nonexistent/sync-tool".into(),
            ..CommandSettings::default()
        },
    );
    p.add_hook(Arc::new(Recorder::new("hook", &calls)));
    let provider: Arc<dyn MirrorProvider> = Arc::new(p);

    let err = SyncJob::new(Arc::clone(&provider)).run_attempt().unwrap_err();
    assert!(matches!(err, JobError::Launch(ProviderError::Spawn { .. })), "got: {err}");
    assert_eq!(
        phases_of(&calls, "hook"),
        vec![Phase::PreJob, Phase::PreExec, Phase::PostExec, Phase::PostFail]
    );
    assert!(!provider.is_running());
}

#[test]
fn unopenable_log_file_aborts_before_any_hook() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "touch ran");
    // The log file path is an existing directory.
    fs::create_dir_all(p.log_file()).unwrap();
    p.add_hook(Arc::new(Recorder::new("hook", &calls)));
    let provider: Arc<dyn MirrorProvider> = Arc::new(p);

    let err = SyncJob::new(Arc::clone(&provider)).run_attempt().unwrap_err();
    assert!(matches!(err, JobError::Launch(ProviderError::Io { .. })), "got: {err}");
    assert!(!dir.path().join("data").join("ran").exists());
    assert!(!provider.is_running());
    assert!(phases_of(&calls, "hook").is_empty(), "no hook may run");
}

#[test]
fn missing_working_dir_is_created_at_launch() {
    let dir = TempDir::new().unwrap();
    let working = dir.path().join("www").join("plain");
    let p = CommandProvider::new(
        BaseProvider::new(ProviderSettings::new("plain", &working, dir.path().join("log"))),
        CommandSettings {
            command: "/bin/sh".into(),
            args: vec!["-c".into(), "touch ran".into()],
            ..CommandSettings::default()
        },
    );

    let outcome = SyncJob::new(Arc::new(p)).run_attempt().expect("attempt");
    assert!(outcome.is_success());
    assert!(working.join("ran").exists());
}

// ---------------------------------------------------------------------------
// 5. Retried pre-job and cancellation
// ---------------------------------------------------------------------------

#[test]
fn failed_pre_job_is_retried_before_the_process_runs() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "touch ran");
    p.add_hook(Arc::new(Recorder::failing("sandbox", &calls, Phase::PreJob)));
    let provider: Arc<dyn MirrorProvider> = Arc::new(p);

    let mut job = SyncJob::new(Arc::clone(&provider));
    for _ in 0..2 {
        let err = job.run_attempt().unwrap_err();
        assert!(matches!(err, JobError::Hook { phase: Phase::PreJob, .. }), "got: {err}");
        assert!(!provider.is_running());
    }

    assert_eq!(job.attempts(), 2);
    assert_eq!(phases_of(&calls, "sandbox"), vec![Phase::PreJob, Phase::PreJob]);
    assert!(!dir.path().join("data").join("ran").exists(), "process must not run");
}

#[test]
fn pre_job_is_not_repeated_once_it_succeeded() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "exit 0");
    p.add_hook(Arc::new(Recorder::new("sandbox", &calls)));
    p.add_hook(Arc::new(Recorder::failing("gate", &calls, Phase::PreExec)));

    let mut job = SyncJob::new(Arc::new(p));
    job.run_attempt().unwrap_err();
    job.run_attempt().unwrap_err();

    assert_eq!(
        phases_of(&calls, "sandbox"),
        vec![Phase::PreJob, Phase::PreExec, Phase::PreExec]
    );
}

/// Calls `terminate` from inside `pre-exec`, as a timeout firing during a
/// slow hook would.
struct Canceller;

impl JobHook for Canceller {
    fn name(&self) -> &str {
        "canceller"
    }

    fn pre_exec(&self, provider: &dyn MirrorProvider) -> Result<(), HookError> {
        provider.terminate().map_err(HookError::new)
    }
}

#[test]
fn terminate_before_launch_cancels_the_process() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "touch ran");
    p.add_hook(Arc::new(Canceller));
    p.add_hook(Arc::new(Recorder::new("hook", &calls)));
    let provider: Arc<dyn MirrorProvider> = Arc::new(p);

    let mut job = SyncJob::new(Arc::clone(&provider));
    let err = job.run_attempt().unwrap_err();
    assert!(matches!(err, JobError::Launch(ProviderError::Cancelled { .. })), "got: {err}");
    assert!(!dir.path().join("data").join("ran").exists(), "process must not run");
    assert!(!provider.is_running());
    assert_eq!(
        phases_of(&calls, "hook"),
        vec![Phase::PreJob, Phase::PreExec, Phase::PostExec, Phase::PostFail]
    );
}

// ---------------------------------------------------------------------------
// 6. Context scoping and isolation lookup
// ---------------------------------------------------------------------------

struct ScopeRecorder {
    seen: Mutex<Vec<(usize, Option<serde_json::Value>)>>,
}

impl JobHook for ScopeRecorder {
    fn name(&self) -> &str {
        "scope-recorder"
    }

    fn pre_exec(&self, provider: &dyn MirrorProvider) -> Result<(), HookError> {
        let base = provider.base();
        self.seen
            .lock()
            .unwrap()
            .push((base.context_depth(), base.context_value("attempt")));
        Ok(())
    }
}

#[test]
fn attempt_runs_in_its_own_scope() {
    let dir = TempDir::new().unwrap();
    let recorder = Arc::new(ScopeRecorder {
        seen: Mutex::new(Vec::new()),
    });
    let mut p = provider(&dir, "exit 1");
    p.add_hook(recorder.clone());
    let provider: Arc<dyn MirrorProvider> = Arc::new(p);

    let mut job = SyncJob::new(Arc::clone(&provider));
    job.run_attempt().expect("first");
    job.run_attempt().expect("second");

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (2, Some(serde_json::json!(1))),
            (2, Some(serde_json::json!(2))),
        ]
    );
    assert_eq!(provider.base().context_depth(), 1);
    assert!(provider.base().context_value("attempt").is_none());
}

#[test]
fn scope_is_exited_when_a_hook_fails() {
    let dir = TempDir::new().unwrap();
    let calls: Calls = Arc::default();
    let mut p = provider(&dir, "exit 0");
    p.add_hook(Arc::new(Recorder::failing("gate", &calls, Phase::PreJob)));
    let provider: Arc<dyn MirrorProvider> = Arc::new(p);

    SyncJob::new(Arc::clone(&provider)).run_attempt().unwrap_err();
    assert_eq!(provider.base().context_depth(), 1);
}

struct Sandbox;

impl JobHook for Sandbox {
    fn name(&self) -> &str {
        "cgroup"
    }

    fn isolation(&self) -> Option<Isolation> {
        Some(Isolation::Cgroup)
    }
}

struct SandboxCheck {
    sandboxed: Mutex<Option<bool>>,
}

impl JobHook for SandboxCheck {
    fn name(&self) -> &str {
        "sandbox-check"
    }

    fn pre_job(&self, provider: &dyn MirrorProvider) -> Result<(), HookError> {
        *self.sandboxed.lock().unwrap() =
            Some(provider.cgroup().is_some() || provider.docker().is_some());
        Ok(())
    }
}

#[test]
fn hooks_can_ask_whether_the_process_is_sandboxed() {
    let dir = TempDir::new().unwrap();
    let recorder = Arc::new(SandboxCheck {
        sandboxed: Mutex::new(None),
    });
    let mut p = provider(&dir, "exit 0");
    p.add_hook(recorder.clone());
    p.add_hook(Arc::new(Sandbox));

    SyncJob::new(Arc::new(p)).run_attempt().expect("attempt");
    assert_eq!(*recorder.sandboxed.lock().unwrap(), Some(true));
}

#[test]
fn working_dir_is_where_the_command_runs() {
    let dir = TempDir::new().unwrap();
    let p = provider(&dir, "pwd > where.txt");
    let expected: PathBuf = p.working_dir();

    SyncJob::new(Arc::new(p)).run_attempt().expect("attempt");
    let recorded = fs::read_to_string(expected.join("where.txt")).unwrap();
    assert_eq!(
        fs::canonicalize(recorded.trim()).unwrap(),
        fs::canonicalize(&expected).unwrap()
    );
}
