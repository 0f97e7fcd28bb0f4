//! Per-mirror provider: owns the context, the process handle and the hooks.
//!
//! [`BaseProvider`] carries the state every provider shares. Variants
//! implement [`MirrorProvider::run`] to decide which command to launch and
//! inherit the rest of the lifecycle from the trait's default methods.
//!
//! # Status model
//!
//! `is_running` is an atomic flag so status polling never blocks. A separate
//! mutex serialises `start`, `launch` and `terminate`; it is not held while
//! waiting for the process, so `wait` and `terminate` can run concurrently
//! from different threads.
//!
//! The running flag covers the whole attempt, hooks included. A `terminate`
//! that arrives before the process exists is remembered and makes the
//! following `launch` fail with [`ProviderError::Cancelled`].

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::context::{Context, LOG_DIR_KEY, LOG_FILE_KEY, WORKING_DIR_KEY};
use crate::error::{io_err, ProviderError};
use crate::hooks::{Isolation, JobHook};
use crate::process::{CmdJob, CommandSpec, DEFAULT_TERMINATE_GRACE};

/// Log file path that discards process output.
pub const DEV_NULL: &str = "/dev/null";

/// Exit codes treated as success when none are configured.
pub const DEFAULT_SUCCESS_EXIT_CODES: &[i32] = &[0];

/// How `start` opens the log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Fresh log for a new job.
    Truncate,
    /// Keep the previous attempt's output (retries).
    Append,
}

/// Construction parameters shared by all providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub interval: Duration,
    pub retry: u32,
    /// `None` leaves the attempt unbounded.
    pub timeout: Option<Duration>,
    pub is_master: bool,
    pub uid: u32,
    pub gid: u32,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
}

impl ProviderSettings {
    /// Settings for `name` running as the worker's own user, with log paths
    /// under `log_dir`.
    pub fn new(name: impl Into<String>, working_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        let log_dir = log_dir.into();
        // SAFETY: geteuid/getegid have no preconditions and cannot fail.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self {
            name: name.into(),
            interval: Duration::from_secs(120 * 60),
            retry: 2,
            timeout: None,
            is_master: true,
            uid,
            gid,
            working_dir: working_dir.into(),
            log_file: log_dir.join("latest.log"),
            log_dir,
        }
    }
}

/// State and lifecycle shared by every provider variant.
pub struct BaseProvider {
    name: String,
    interval: Duration,
    retry: u32,
    timeout: Option<Duration>,
    is_master: bool,
    uid: u32,
    gid: u32,
    terminate_grace: Duration,

    ctx: Mutex<Context>,
    hooks: Vec<Arc<dyn JobHook>>,
    cgroup: Option<Arc<dyn JobHook>>,
    docker: Option<Arc<dyn JobHook>>,

    lock: Mutex<()>,
    is_running: AtomicBool,
    cancelled: AtomicBool,
    cmd: Mutex<Option<Arc<CmdJob>>>,
    log_file: Mutex<Option<File>>,
    success_exit_codes: RwLock<Vec<i32>>,
}

impl BaseProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let mut ctx = Context::new();
        ctx.set(WORKING_DIR_KEY, path_value(&settings.working_dir));
        ctx.set(LOG_DIR_KEY, path_value(&settings.log_dir));
        ctx.set(LOG_FILE_KEY, path_value(&settings.log_file));

        Self {
            name: settings.name,
            interval: settings.interval,
            retry: settings.retry,
            timeout: settings.timeout,
            is_master: settings.is_master,
            uid: settings.uid,
            gid: settings.gid,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            ctx: Mutex::new(ctx),
            hooks: Vec::new(),
            cgroup: None,
            docker: None,
            lock: Mutex::new(()),
            is_running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cmd: Mutex::new(None),
            log_file: Mutex::new(None),
            success_exit_codes: RwLock::new(DEFAULT_SUCCESS_EXIT_CODES.to_vec()),
        }
    }

    /// Override the SIGTERM → SIGKILL grace period used by `terminate`.
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn retry(&self) -> u32 {
        self.retry
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    // -----------------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------------

    /// Append `hook`; isolation hooks are also kept for direct lookup.
    pub fn add_hook(&mut self, hook: Arc<dyn JobHook>) {
        match hook.isolation() {
            Some(Isolation::Cgroup) => self.cgroup = Some(Arc::clone(&hook)),
            Some(Isolation::Docker) => self.docker = Some(Arc::clone(&hook)),
            None => {}
        }
        self.hooks.push(hook);
    }

    pub fn hooks(&self) -> &[Arc<dyn JobHook>] {
        &self.hooks
    }

    pub fn cgroup(&self) -> Option<&Arc<dyn JobHook>> {
        self.cgroup.as_ref()
    }

    pub fn docker(&self) -> Option<&Arc<dyn JobHook>> {
        self.docker.as_ref()
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    /// Push a child scope for one attempt.
    pub fn enter_context(&self) {
        lock(&self.ctx).enter();
    }

    /// Pop the innermost scope.
    ///
    /// # Panics
    ///
    /// When called on the root scope; every `exit_context` must pair with an
    /// earlier `enter_context`.
    pub fn exit_context(&self) {
        if let Err(err) = lock(&self.ctx).exit() {
            panic!("provider '{}': {err}", self.name);
        }
    }

    /// Bind `key` in the innermost scope.
    pub fn set_context(&self, key: &str, value: impl Into<Value>) {
        lock(&self.ctx).set(key, value);
    }

    pub fn context_value(&self, key: &str) -> Option<Value> {
        lock(&self.ctx).get(key).cloned()
    }

    pub fn context_depth(&self) -> usize {
        lock(&self.ctx).depth()
    }

    /// # Panics
    ///
    /// When the working directory is not bound to a string.
    pub fn working_dir(&self) -> PathBuf {
        self.required_path(WORKING_DIR_KEY)
    }

    /// # Panics
    ///
    /// When the log directory is not bound to a string.
    pub fn log_dir(&self) -> PathBuf {
        self.required_path(LOG_DIR_KEY)
    }

    /// # Panics
    ///
    /// When the log file is not bound to a string.
    pub fn log_file(&self) -> PathBuf {
        self.required_path(LOG_FILE_KEY)
    }

    fn required_path(&self, key: &str) -> PathBuf {
        match lock(&self.ctx).get_path(key) {
            Some(path) => path,
            None => panic!("provider '{}': context key '{key}' must be bound to a path", self.name),
        }
    }

    // -----------------------------------------------------------------------
    // Success exit codes
    // -----------------------------------------------------------------------

    /// Replace the success set. An empty slice restores the default `{0}`.
    pub fn set_success_exit_codes(&self, codes: &[i32]) {
        let codes = if codes.is_empty() {
            DEFAULT_SUCCESS_EXIT_CODES.to_vec()
        } else {
            codes.to_vec()
        };
        *self
            .success_exit_codes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = codes;
    }

    pub fn success_exit_codes(&self) -> Vec<i32> {
        self.success_exit_codes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Begin an attempt: open the log file and mark the provider running.
    pub fn start(&self, mode: LogMode) -> Result<(), ProviderError> {
        let _guard = lock(&self.lock);
        if self.is_running() {
            return Err(ProviderError::AlreadyRunning {
                name: self.name.clone(),
            });
        }

        let log = self.open_log_file(mode)?;
        *lock(&self.log_file) = log;
        *lock(&self.cmd) = None;
        self.cancelled.store(false, Ordering::SeqCst);

        tracing::debug!(mirror = %self.name, "set running to true");
        self.is_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Spawn `spec` for the current attempt and signal `started` once the
    /// process handle exists. Returns without waiting for the process.
    pub fn launch(&self, spec: CommandSpec, started: Sender<()>) -> Result<(), ProviderError> {
        let _guard = lock(&self.lock);
        if !self.is_running() {
            return Err(ProviderError::NotStarted {
                name: self.name.clone(),
            });
        }

        let spawned = if self.cancelled.load(Ordering::SeqCst) {
            Err(ProviderError::Cancelled {
                name: self.name.clone(),
            })
        } else {
            ensure_working_dir(&spec.working_dir).and_then(|()| {
                let log = lock(&self.log_file);
                CmdJob::spawn(&spec, log.as_ref(), self.success_exit_codes())
            })
        };
        let job = match spawned {
            Ok(job) => job.with_grace(self.terminate_grace),
            Err(err) => {
                tracing::error!(mirror = %self.name, error = %err, "failed to launch sync process");
                self.close_log_file();
                self.is_running.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        *lock(&self.cmd) = Some(Arc::new(job));
        // The receiver may have given up waiting; the launch still stands.
        let _ = started.send(());
        Ok(())
    }

    /// Block until the launched process exits, then clear the running flag.
    pub fn wait(&self) -> Result<(), ProviderError> {
        tracing::debug!(mirror = %self.name, "calling wait");
        let cmd = lock(&self.cmd).clone();
        let result = match cmd {
            Some(job) => job.wait(),
            None => Err(ProviderError::NotLaunched {
                name: self.name.clone(),
            }),
        };

        self.close_log_file();
        tracing::debug!(mirror = %self.name, "set running to false");
        self.is_running.store(false, Ordering::SeqCst);
        result
    }

    /// End an attempt that never launched: close the log file and clear the
    /// running flag.
    pub fn release(&self) {
        let _guard = lock(&self.lock);
        self.close_log_file();
        tracing::debug!(mirror = %self.name, "set running to false");
        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Cancel the running attempt; a no-op when nothing is running.
    ///
    /// Before the process is launched this only marks the attempt cancelled.
    pub fn terminate(&self) -> Result<(), ProviderError> {
        let _guard = lock(&self.lock);
        tracing::debug!(mirror = %self.name, "terminating provider");
        if !self.is_running() {
            tracing::debug!(mirror = %self.name, "terminate called while not running");
            return Ok(());
        }

        let cmd = lock(&self.cmd).clone();
        match cmd {
            Some(job) => job.terminate(),
            None => {
                if !self.cancelled.swap(true, Ordering::SeqCst) {
                    tracing::info!(mirror = %self.name, "attempt cancelled before launch");
                }
                Ok(())
            }
        }
    }

    fn open_log_file(&self, mode: LogMode) -> Result<Option<File>, ProviderError> {
        let path = self.log_file();
        if path == Path::new(DEV_NULL) {
            return Ok(None);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            LogMode::Append => options.append(true),
            LogMode::Truncate => options.write(true).truncate(true),
        };
        match options.open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(err) => {
                tracing::error!(mirror = %self.name, path = %path.display(), error = %err, "error opening log file");
                Err(io_err(path, err))
            }
        }
    }

    fn close_log_file(&self) {
        lock(&self.log_file).take();
    }
}

fn ensure_working_dir(dir: &Path) -> Result<(), ProviderError> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

/// A mirror's sync provider as seen by hooks and the scheduler.
///
/// Variants supply [`base`](Self::base) and [`run`](Self::run); everything
/// else delegates to [`BaseProvider`].
pub trait MirrorProvider: Send + Sync {
    fn base(&self) -> &BaseProvider;

    fn base_mut(&mut self) -> &mut BaseProvider;

    /// Launch the sync process for the current attempt, signalling `started`
    /// once the handle exists. Returns without waiting for the process.
    fn run(&self, started: Sender<()>) -> Result<(), ProviderError>;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn interval(&self) -> Duration {
        self.base().interval()
    }

    fn retry(&self) -> u32 {
        self.base().retry()
    }

    fn timeout(&self) -> Option<Duration> {
        self.base().timeout()
    }

    fn is_master(&self) -> bool {
        self.base().is_master()
    }

    fn add_hook(&mut self, hook: Arc<dyn JobHook>) {
        self.base_mut().add_hook(hook);
    }

    fn hooks(&self) -> &[Arc<dyn JobHook>] {
        self.base().hooks()
    }

    fn cgroup(&self) -> Option<&Arc<dyn JobHook>> {
        self.base().cgroup()
    }

    fn docker(&self) -> Option<&Arc<dyn JobHook>> {
        self.base().docker()
    }

    fn working_dir(&self) -> PathBuf {
        self.base().working_dir()
    }

    fn log_dir(&self) -> PathBuf {
        self.base().log_dir()
    }

    fn log_file(&self) -> PathBuf {
        self.base().log_file()
    }

    fn start(&self, mode: LogMode) -> Result<(), ProviderError> {
        self.base().start(mode)
    }

    fn wait(&self) -> Result<(), ProviderError> {
        self.base().wait()
    }

    fn terminate(&self) -> Result<(), ProviderError> {
        self.base().terminate()
    }

    fn is_running(&self) -> bool {
        self.base().is_running()
    }

    fn set_success_exit_codes(&self, codes: &[i32]) {
        self.base().set_success_exit_codes(codes);
    }

    fn success_exit_codes(&self) -> Vec<i32> {
        self.base().success_exit_codes()
    }
}

// ---------------------------------------------------------------------------
// Command provider
// ---------------------------------------------------------------------------

/// What a [`CommandProvider`] runs.
#[derive(Debug, Clone, Default)]
pub struct CommandSettings {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub upstream: Option<String>,
}

/// Provider running an arbitrary command in the mirror's working directory.
pub struct CommandProvider {
    base: BaseProvider,
    settings: CommandSettings,
}

impl CommandProvider {
    pub fn new(base: BaseProvider, settings: CommandSettings) -> Self {
        Self { base, settings }
    }

    /// The spec `run` will launch, resolved against the current context.
    pub fn command_spec(&self) -> CommandSpec {
        let working_dir = self.base.working_dir();
        let mut env = self.settings.env.clone();
        env.insert("MIRRORKIT_MIRROR_NAME".into(), self.base.name().to_string());
        env.insert("MIRRORKIT_WORKING_DIR".into(), path_value(&working_dir));
        env.insert("MIRRORKIT_LOG_DIR".into(), path_value(&self.base.log_dir()));
        env.insert("MIRRORKIT_LOG_FILE".into(), path_value(&self.base.log_file()));
        if let Some(upstream) = &self.settings.upstream {
            env.insert("MIRRORKIT_UPSTREAM_URL".into(), upstream.clone());
        }

        CommandSpec {
            program: self.settings.command.clone(),
            args: self.settings.args.clone(),
            env,
            working_dir,
            uid: None,
            gid: None,
        }
        .run_as(self.base.uid(), self.base.gid())
    }
}

impl MirrorProvider for CommandProvider {
    fn base(&self) -> &BaseProvider {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseProvider {
        &mut self.base
    }

    fn run(&self, started: Sender<()>) -> Result<(), ProviderError> {
        let spec = self.command_spec();
        tracing::debug!(mirror = %self.name(), program = %spec.program, "running command provider");
        self.base.launch(spec, started)
    }
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
