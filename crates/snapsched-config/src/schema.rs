//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Filesystem used by requests that name none
    pub default_fs: Option<String>,

    /// Global daemon settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Scheduler tuning
    #[serde(default)]
    pub scheduler: RawSchedulerConfig,

    /// Managed filesystems
    #[serde(default)]
    pub filesystems: Vec<RawFilesystem>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Parent of per-filesystem metadata directories
    pub data_dir: Option<PathBuf>,
}

/// Scheduler settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSchedulerConfig {
    /// Name of the snapshot directory inside every scheduled path
    pub snapshot_dir: Option<String>,

    /// Consecutive "path not found" failures before a path is deactivated.
    /// 0 never deactivates.
    pub max_consecutive_failures: Option<u32>,
}

/// One managed filesystem
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawFilesystem {
    /// Name used in requests
    pub name: String,

    /// Host directory the filesystem is mounted at
    pub root: PathBuf,

    /// Directory holding the persisted schedule database
    pub metadata_dir: Option<PathBuf>,
}
