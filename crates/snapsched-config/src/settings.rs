//! Validated settings

use crate::schema::{RawConfig, RawDaemonConfig, RawFilesystem, RawSchedulerConfig};
use snapsched_util::{default_data_dir, default_socket_path, FsName};
use std::path::PathBuf;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone)]
pub struct Settings {
    pub daemon: DaemonSettings,
    pub scheduler: SchedulerSettings,
    pub filesystems: Vec<FilesystemSettings>,
    pub default_fs: Option<FsName>,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let daemon = DaemonSettings::from_raw(raw.daemon);
        let filesystems = raw
            .filesystems
            .into_iter()
            .map(|fs| FilesystemSettings::from_raw(fs, &daemon.data_dir))
            .collect();

        Self {
            scheduler: SchedulerSettings::from_raw(raw.scheduler),
            default_fs: raw.default_fs.map(FsName::new),
            daemon,
            filesystems,
        }
    }

    /// Get a filesystem by name
    pub fn get_filesystem(&self, name: &FsName) -> Option<&FilesystemSettings> {
        self.filesystems.iter().find(|fs| &fs.name == name)
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl DaemonSettings {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(default_data_dir),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            data_dir: default_data_dir(),
        }
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Directory inside each scheduled path that holds its snapshots
    pub snapshot_dir: String,

    /// Consecutive "path not found" failures before a path is deactivated;
    /// 0 disables deactivation
    pub max_consecutive_failures: u32,
}

impl SchedulerSettings {
    fn from_raw(raw: RawSchedulerConfig) -> Self {
        let defaults = Self::default();
        Self {
            snapshot_dir: raw.snapshot_dir.unwrap_or(defaults.snapshot_dir),
            max_consecutive_failures: raw
                .max_consecutive_failures
                .unwrap_or(defaults.max_consecutive_failures),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            snapshot_dir: ".snap".to_string(),
            max_consecutive_failures: 3,
        }
    }
}

/// A managed filesystem
#[derive(Debug, Clone)]
pub struct FilesystemSettings {
    pub name: FsName,
    pub root: PathBuf,
    pub metadata_dir: PathBuf,
}

impl FilesystemSettings {
    fn from_raw(raw: RawFilesystem, data_dir: &std::path::Path) -> Self {
        let metadata_dir = raw
            .metadata_dir
            .unwrap_or_else(|| data_dir.join(&raw.name));
        Self {
            name: FsName::new(raw.name),
            root: raw.root,
            metadata_dir,
        }
    }
}
