//! Error types for snapsched

use thiserror::Error;

use crate::FsName;

/// Error taxonomy for schedule operations
///
/// Every crate-local error converts into this type before it reaches the
/// command layer.
#[derive(Debug, Error)]
pub enum SnapError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schedule already exists: {0}")]
    DuplicateRule(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Schedule database for filesystem '{fs}' is corrupt: {message}")]
    FatalCorruption { fs: FsName, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::DuplicateRule(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn corruption(fs: &FsName, msg: impl Into<String>) -> Self {
        Self::FatalCorruption {
            fs: fs.clone(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a background firing may swallow this error and carry on
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_message_names_filesystem() {
        let err = SnapError::corruption(&FsName::new("cephfs"), "near \"CREAT\": syntax error");
        let msg = err.to_string();
        assert!(msg.contains("'cephfs'"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn only_storage_errors_are_transient() {
        assert!(SnapError::unavailable("timeout").is_transient());
        assert!(!SnapError::not_found("/a").is_transient());
        assert!(!SnapError::corruption(&FsName::new("a"), "x").is_transient());
    }
}
