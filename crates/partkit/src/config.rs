//! Runtime settings: where the mount table lives, how the mtab lock behaves and how long
//! external commands may run.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub mount_table: MountTablePaths,
    pub lock: LockSettings,
    pub commands: CommandSettings,
}

/// Files consulted when resolving where a device is mounted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MountTablePaths {
    /// Primary mount list.
    pub proc_mounts: PathBuf,
    /// Legacy mount list; also the resource the mtab lock is keyed on.
    pub mtab: PathBuf,
}

impl Default for MountTablePaths {
    fn default() -> Self {
        Self {
            proc_mounts: PathBuf::from("/proc/mounts"),
            mtab: PathBuf::from("/etc/mtab"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockSettings {
    /// Directory holding lock files.
    pub dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
            timeout_secs: 60,
        }
    }
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandSettings {
    pub timeout_secs: u64,
    /// mkfs and the backing-file zero fill can take far longer than anything else.
    pub format_timeout_secs: u64,
    pub use_sudo: bool,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            format_timeout_secs: 10 * 60,
            use_sudo: true,
        }
    }
}

impl CommandSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn format_timeout(&self) -> Duration {
        Duration::from_secs(self.format_timeout_secs)
    }
}

impl Settings {
    /// Load settings from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
