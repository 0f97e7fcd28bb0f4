//! Worker configuration file.
//!
//! ```text
//! <config_dir>/mirrorkit/worker.yaml   (default; override with --config)
//! ```

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mirrorkit_core::{GlobalConfig, MirrorConfig, MirrorProvider};
use mirrorkit_snapshot::{SnapshotLayout, SnapshotSettings};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub global: GlobalConfig,
    #[serde(default)]
    pub snapshot: Option<SnapshotSettings>,
    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,
}

/// `<config_dir>/mirrorkit/worker.yaml`
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
    Ok(dir.join("mirrorkit").join("worker.yaml"))
}

/// Read, parse and validate the config at `path`.
pub fn load_at(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let config: WorkerConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for mirror in &self.mirrors {
            if !seen.insert(mirror.name.as_str()) {
                return Err(ConfigError::DuplicateMirror {
                    name: mirror.name.clone(),
                });
            }
            if mirror.command.trim().is_empty() {
                return Err(ConfigError::EmptyCommand {
                    name: mirror.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn mirror(&self, name: &str) -> Result<&MirrorConfig, ConfigError> {
        self.mirrors
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ConfigError::UnknownMirror {
                name: name.to_string(),
            })
    }

    /// Snapshot settings and layout for `mirror`, when it uses snapshots.
    pub fn snapshot_for(&self, mirror: &MirrorConfig) -> Option<(&SnapshotSettings, SnapshotLayout)> {
        let settings = self.snapshot.as_ref()?;
        if !mirror.use_snapshot.unwrap_or(true) {
            return None;
        }
        let layout = settings.layout(&self.global.mirror_dir, &mirror.name, mirror.dir());
        Some((settings, layout))
    }

    /// Provider for `name`, with its snapshot hook attached and initialised
    /// when snapshots are enabled.
    pub fn build_provider(&self, name: &str) -> Result<Arc<dyn MirrorProvider>, ConfigError> {
        let mirror = self.mirror(name)?;
        let snapshot = self.snapshot_for(mirror);
        let working_dir = snapshot.as_ref().map(|(_, layout)| layout.working_dir.clone());

        let mut provider = mirror.build_provider(&self.global, working_dir.as_deref());
        if let Some((settings, layout)) = snapshot {
            let (uid, gid) = (provider.base().uid(), provider.base().gid());
            let hook = settings.build_hook(&mirror.name, layout, uid, gid)?;
            provider.add_hook(hook);
        }
        Ok(Arc::new(provider))
    }
}
