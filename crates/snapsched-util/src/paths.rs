//! Path handling for snapsched
//!
//! Two unrelated concerns live here:
//! - Normalization of schedule paths, which are absolute paths *inside* a
//!   managed filesystem and are used as unique keys by the schedule store
//! - Default locations of the daemon socket, config file and data directory
//!   on the local host:
//!   - Socket: `$XDG_RUNTIME_DIR/snapsched/snapschedd.sock` or `/tmp/snapsched-$USER/snapschedd.sock`
//!   - Config: `$XDG_CONFIG_HOME/snapsched/config.toml` or `~/.config/snapsched/config.toml`
//!   - Data: `$XDG_DATA_HOME/snapsched` or `~/.local/share/snapsched`

use std::path::PathBuf;

use crate::{Result, SnapError};

/// Environment variable for overriding the socket path
pub const SNAPSCHED_SOCKET_ENV: &str = "SNAPSCHED_SOCKET";

/// Environment variable for overriding the config file path
pub const SNAPSCHED_CONFIG_ENV: &str = "SNAPSCHED_CONFIG";

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "snapschedd.sock";

/// Application subdirectory name
const APP_DIR: &str = "snapsched";

/// Normalize a schedule path.
///
/// The result is absolute, has no `.` or `..` segments, no repeated slashes
/// and no trailing slash (except for the root itself). `..` at the root
/// stays at the root. Relative paths are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(SnapError::validation(format!(
            "path '{}' is not absolute",
            path
        )));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Whether `path` equals `prefix` or lies below it, compared segment-wise.
///
/// Both arguments must already be normalized.
pub fn is_path_under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Join a normalized schedule path with a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$SNAPSCHED_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/snapsched/snapschedd.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/snapsched-$USER/snapschedd.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(SNAPSCHED_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking SNAPSCHED_SOCKET env var.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$SNAPSCHED_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/snapsched/config.toml`
/// 3. `~/.config/snapsched/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(SNAPSCHED_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Get the default data directory, used as the parent of per-filesystem
/// metadata directories when the config does not name one.
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
