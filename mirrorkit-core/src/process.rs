//! One OS process per sync attempt.
//!
//! The child runs in its own process group so that cancellation reaches the
//! whole tree the sync command forks. Reaping and signalling are serialised
//! through the `state` mutex: [`CmdJob::wait`] blocks on `waitid(WNOWAIT)`
//! outside the lock and only reaps while holding it, so [`CmdJob::terminate`]
//! never signals a pid that has already been recycled.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::ProviderError;

/// Time between SIGTERM and SIGKILL when terminating.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to spawn the sync command.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    /// Run as this uid. `None` keeps the worker's identity.
    pub uid: Option<u32>,
    /// Run as this gid. `None` keeps the worker's identity.
    pub gid: Option<u32>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Drop privileges to `uid`/`gid`, skipping ids equal to the worker's
    /// effective ones (changing them would require privileges for nothing).
    pub fn run_as(mut self, uid: u32, gid: u32) -> Self {
        // SAFETY: geteuid/getegid have no preconditions and cannot fail.
        let (euid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };
        self.uid = (uid != euid).then_some(uid);
        self.gid = (gid != egid).then_some(gid);
        self
    }
}

#[derive(Debug)]
enum ChildState {
    Running(Child),
    Exited(ExitStatus),
}

/// Handle on a launched sync process.
#[derive(Debug)]
pub struct CmdJob {
    pid: u32,
    program: String,
    success_exit_codes: Vec<i32>,
    grace: Duration,
    state: Mutex<ChildState>,
    exited: Condvar,
}

impl CmdJob {
    /// Spawn `spec`, sending stdout and stderr to `log` (or discarding them).
    pub fn spawn(
        spec: &CommandSpec,
        log: Option<&File>,
        success_exit_codes: Vec<i32>,
    ) -> Result<Self, ProviderError> {
        let spawn_err = |source| ProviderError::Spawn {
            program: spec.program.clone(),
            source,
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .process_group(0);
        if !spec.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&spec.working_dir);
        }
        match log {
            Some(file) => {
                cmd.stdout(file.try_clone().map_err(spawn_err)?);
                cmd.stderr(file.try_clone().map_err(spawn_err)?);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        if let Some(gid) = spec.gid {
            cmd.gid(gid);
        }
        if let Some(uid) = spec.uid {
            cmd.uid(uid);
        }

        let child = cmd.spawn().map_err(spawn_err)?;
        let pid = child.id();
        tracing::info!(program = %spec.program, pid, "launched sync process");

        Ok(Self {
            pid,
            program: spec.program.clone(),
            success_exit_codes,
            grace: DEFAULT_TERMINATE_GRACE,
            state: Mutex::new(ChildState::Running(child)),
            exited: Condvar::new(),
        })
    }

    /// Override the SIGTERM → SIGKILL grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Block until the process exits and classify its status.
    ///
    /// Exit codes in the success set yield `Ok(())`; any other code or a
    /// terminating signal is an error.
    pub fn wait(&self) -> Result<(), ProviderError> {
        if let Err(err) = self.block_until_exit() {
            // Fall through to the reaping wait below, which reports the
            // definitive status or error.
            tracing::debug!(pid = self.pid, error = %err, "waitid failed");
        }

        let status = {
            let mut state = self.lock_state();
            let status = match &mut *state {
                ChildState::Exited(status) => *status,
                ChildState::Running(child) => child.wait().map_err(|e| ProviderError::Io {
                    path: PathBuf::from(&self.program),
                    source: e,
                })?,
            };
            *state = ChildState::Exited(status);
            status
        };
        self.exited.notify_all();

        self.classify(status)
    }

    /// Ask the process group to stop, escalating to SIGKILL after the grace
    /// period. Returns once the process has exited or has been killed.
    pub fn terminate(&self) -> Result<(), ProviderError> {
        let state = self.lock_state();
        if matches!(*state, ChildState::Exited(_)) {
            return Ok(());
        }
        self.signal_group(libc::SIGTERM)?;

        let deadline = Instant::now() + self.grace;
        let mut state = state;
        while matches!(*state, ChildState::Running(_)) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .exited
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }

        if matches!(*state, ChildState::Running(_)) {
            tracing::warn!(pid = self.pid, program = %self.program, "process ignored SIGTERM, killing");
            self.signal_group(libc::SIGKILL)?;
        }
        Ok(())
    }

    fn classify(&self, status: ExitStatus) -> Result<(), ProviderError> {
        match (status.code(), status.signal()) {
            (Some(code), _) if self.success_exit_codes.contains(&code) => {
                tracing::info!(pid = self.pid, code, "sync process exited successfully");
                Ok(())
            }
            (Some(code), _) => Err(ProviderError::ExitCode { code }),
            (None, Some(signal)) => Err(ProviderError::Signaled { signal }),
            (None, None) => Err(ProviderError::ExitCode { code: -1 }),
        }
    }

    /// Wait for the child to become waitable without reaping it.
    fn block_until_exit(&self) -> io::Result<()> {
        loop {
            // SAFETY: siginfo_t is plain data; waitid fills it in and we never
            // read it. WNOWAIT leaves the child reapable by `Child::wait`.
            let rc = unsafe {
                let mut info: libc::siginfo_t = std::mem::zeroed();
                libc::waitid(
                    libc::P_PID,
                    self.pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn signal_group(&self, signal: i32) -> Result<(), ProviderError> {
        // SAFETY: kill has no memory-safety preconditions; a negative pid
        // addresses the process group created at spawn.
        let rc = unsafe { libc::kill(-(self.pid as libc::pid_t), signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Group already gone.
            return Ok(());
        }
        Err(ProviderError::Kill {
            pid: self.pid,
            signal,
            source: err,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ChildState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
