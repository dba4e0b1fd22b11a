//! Client traits

use snapsched_util::{FsName, Result, SnapError};
use std::sync::Arc;
use thiserror::Error;

/// Errors from filesystem client operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Filesystem unavailable: {0}")]
    Unavailable(String),
}

impl FsError {
    /// Map an I/O error on `path` to the closest variant.
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(path.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_string()),
            ErrorKind::NotADirectory => Self::NotADirectory(path.to_string()),
            _ => Self::Unavailable(format!("{}: {}", path, err)),
        }
    }
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Errors from object store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store unavailable: {0}")]
    Unavailable(String),
}

pub type ObjectResult<T> = std::result::Result<T, ObjectStoreError>;

impl From<FsError> for SnapError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound(path) => SnapError::not_found(format!("no such path: {}", path)),
            other => SnapError::unavailable(other.to_string()),
        }
    }
}

impl From<ObjectStoreError> for SnapError {
    fn from(err: ObjectStoreError) -> Self {
        SnapError::unavailable(err.to_string())
    }
}

/// Client of one managed filesystem
///
/// Paths are absolute within the filesystem. Calls block; the scheduler
/// issues them from blocking tasks and never while holding its store lock.
pub trait FsClient: Send + Sync {
    /// Create one directory. The parent must exist.
    fn mkdir(&self, path: &str) -> FsResult<()>;

    /// Names of the entries of a directory, without `.` and `..`
    fn readdir(&self, path: &str) -> FsResult<Vec<String>>;

    /// Remove one empty directory, or one snapshot
    fn rmdir(&self, path: &str) -> FsResult<()>;
}

/// Blob store holding one object per key
///
/// Writes replace the whole object; there is no append or partial update.
pub trait ObjectStore: Send + Sync {
    /// Size of an object in bytes
    fn stat(&self, key: &str) -> ObjectResult<u64>;

    /// Read up to `size` bytes of an object
    fn read(&self, key: &str, size: u64) -> ObjectResult<Vec<u8>>;

    /// Replace an object with `data`
    fn write_full(&self, key: &str, data: &[u8]) -> ObjectResult<()>;
}

/// Resolves filesystem names to their clients
pub trait FsConnector: Send + Sync {
    /// Filesystem client for `fs`; `NotFound` for an unknown filesystem
    fn fs_client(&self, fs: &FsName) -> Result<Arc<dyn FsClient>>;

    /// Metadata object store for `fs`; `NotFound` for an unknown filesystem
    fn object_store(&self, fs: &FsName) -> Result<Arc<dyn ObjectStore>>;

    /// Filesystem used when a request names none
    fn default_fs(&self) -> Option<FsName>;

    /// Every filesystem this connector knows
    fn filesystems(&self) -> Vec<FsName>;
}
