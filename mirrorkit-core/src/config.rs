//! Serializable worker and mirror settings.
//!
//! These types only describe what a provider needs; reading them from disk
//! is the worker binary's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::{
    BaseProvider, CommandProvider, CommandSettings, MirrorProvider, ProviderSettings,
};

/// Worker-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_worker_name")]
    pub name: String,
    /// Per-mirror logs go to `<log_dir>/<mirror>/`.
    pub log_dir: PathBuf,
    /// Public serve root; mirror data lives in `<mirror_dir>/<dir>`.
    pub mirror_dir: PathBuf,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// `0` disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Defaults to the worker's effective uid.
    #[serde(default)]
    pub uid: Option<u32>,
    /// Defaults to the worker's effective gid.
    #[serde(default)]
    pub gid: Option<u32>,
}

/// One mirror served by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,
    /// Directory name under the mirror and snapshot roots; defaults to `name`.
    #[serde(default)]
    pub dir: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    #[serde(default)]
    pub retry: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Extra exit codes counted as success on top of `0`.
    #[serde(default)]
    pub success_exit_codes: Vec<i32>,
    #[serde(default = "default_true")]
    pub is_master: bool,
    /// Overrides `<log_dir>/<mirror>/latest.log`; `/dev/null` discards output.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Opt out of snapshots when the worker has them configured.
    #[serde(default)]
    pub use_snapshot: Option<bool>,
}

impl MirrorConfig {
    pub fn dir(&self) -> &str {
        self.dir.as_deref().unwrap_or(&self.name)
    }

    /// `0` plus the configured extra codes, deduplicated.
    pub fn success_exit_codes(&self) -> Vec<i32> {
        let mut codes = vec![0];
        for code in &self.success_exit_codes {
            if !codes.contains(code) {
                codes.push(*code);
            }
        }
        codes
    }

    /// Provider settings for this mirror. `working_dir` replaces the default
    /// `<mirror_dir>/<dir>`, e.g. with a snapshot working directory.
    pub fn provider_settings(
        &self,
        global: &GlobalConfig,
        working_dir: Option<&Path>,
    ) -> ProviderSettings {
        let working_dir = working_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| global.mirror_dir.join(self.dir()));
        let log_dir = global.log_dir.join(&self.name);

        let mut settings = ProviderSettings::new(self.name.clone(), working_dir, log_dir);
        settings.interval =
            Duration::from_secs(60 * self.interval_minutes.unwrap_or(global.interval_minutes));
        settings.retry = self.retry.unwrap_or(global.retry);
        settings.timeout = match self.timeout_secs.unwrap_or(global.timeout_secs) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        settings.is_master = self.is_master;
        if let Some(uid) = global.uid {
            settings.uid = uid;
        }
        if let Some(gid) = global.gid {
            settings.gid = gid;
        }
        if let Some(log_file) = &self.log_file {
            settings.log_file = log_file.clone();
        }
        settings
    }

    pub fn command_settings(&self) -> CommandSettings {
        CommandSettings {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            upstream: self.upstream.clone(),
        }
    }

    /// Build the command provider for this mirror, without hooks.
    pub fn build_provider(
        &self,
        global: &GlobalConfig,
        working_dir: Option<&Path>,
    ) -> CommandProvider {
        let base = BaseProvider::new(self.provider_settings(global, working_dir));
        let provider = CommandProvider::new(base, self.command_settings());
        provider.set_success_exit_codes(&self.success_exit_codes());
        provider
    }
}

fn default_worker_name() -> String {
    "worker".to_string()
}

fn default_interval_minutes() -> u64 {
    120
}

fn default_retry() -> u32 {
    2
}

fn default_true() -> bool {
    true
}
