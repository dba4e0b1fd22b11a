//! Configuration validation

use crate::schema::{RawConfig, RawFilesystem};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Filesystem '{fs}': {message}")]
    FilesystemError { fs: String, message: String },

    #[error("Duplicate filesystem name: {0}")]
    DuplicateFilesystem(String),

    #[error("default_fs '{0}' is not a configured filesystem")]
    UnknownDefaultFs(String),

    #[error("Scheduler config error: {0}")]
    SchedulerError(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration, collecting every error
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.filesystems.is_empty() {
        errors.push(ValidationError::GlobalError(
            "at least one [[filesystems]] entry is required".into(),
        ));
    }

    let mut seen = HashSet::new();
    for fs in &config.filesystems {
        if !seen.insert(fs.name.as_str()) {
            errors.push(ValidationError::DuplicateFilesystem(fs.name.clone()));
        }
        errors.extend(validate_filesystem(fs));
    }

    if let Some(default_fs) = &config.default_fs
        && !seen.contains(default_fs.as_str())
    {
        errors.push(ValidationError::UnknownDefaultFs(default_fs.clone()));
    }

    if let Some(dir) = &config.scheduler.snapshot_dir
        && (dir.is_empty() || dir == "." || dir == ".." || dir.contains('/'))
    {
        errors.push(ValidationError::SchedulerError(format!(
            "snapshot_dir '{}' must be a single directory name",
            dir
        )));
    }

    if let Some(path) = &config.daemon.data_dir
        && !path.is_absolute()
    {
        errors.push(ValidationError::GlobalError(format!(
            "data_dir '{}' must be absolute",
            path.display()
        )));
    }

    errors
}

fn validate_filesystem(fs: &RawFilesystem) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let error = |message: String| ValidationError::FilesystemError {
        fs: fs.name.clone(),
        message,
    };

    if fs.name.trim().is_empty() {
        errors.push(error("name cannot be empty".into()));
    }

    if !fs.root.is_absolute() {
        errors.push(error(format!("root '{}' must be absolute", fs.root.display())));
    }

    if let Some(dir) = &fs.metadata_dir
        && !dir.is_absolute()
    {
        errors.push(error(format!(
            "metadata_dir '{}' must be absolute",
            dir.display()
        )));
    }

    errors
}
