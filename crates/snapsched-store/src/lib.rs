//! Schedule database for snapschedd
//!
//! Provides:
//! - Schedule paths and their rules in an in-memory SQLite database
//! - Run bookkeeping (first/last snapshot, prune counters)
//! - Mirroring of the whole database, as a SQL dump, to one object-store
//!   key per filesystem after every mutation

mod dump;
mod schema;
mod sqlite;
mod types;

pub use dump::*;
pub use schema::DB_OBJECT_NAME;
pub use sqlite::*;
pub use types::*;

use snapsched_host_api::ObjectStoreError;
use snapsched_util::{FsName, SnapError};
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate rule: {0}")]
    DuplicateRule(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid value: {0}")]
    Validation(String),

    #[error("Schedule database of '{fs}' is corrupt: {message}")]
    Corruption { fs: FsName, message: String },

    #[error("Object store error: {0}")]
    Backend(#[from] ObjectStoreError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<SnapError> for StoreError {
    fn from(e: SnapError) -> Self {
        match e {
            SnapError::Validation(msg) => StoreError::Validation(msg),
            SnapError::NotFound(msg) => StoreError::NotFound(msg),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<StoreError> for SnapError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(msg) => SnapError::internal(msg),
            StoreError::DuplicateRule(msg) => SnapError::duplicate(msg),
            StoreError::NotFound(msg) => SnapError::not_found(msg),
            StoreError::Validation(msg) => SnapError::validation(msg),
            StoreError::Corruption { fs, message } => SnapError::corruption(&fs, message),
            StoreError::Backend(err) => SnapError::from(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_taxonomy() {
        assert!(matches!(
            SnapError::from(StoreError::DuplicateRule("/a".into())),
            SnapError::DuplicateRule(_)
        ));
        assert!(matches!(
            SnapError::from(StoreError::Backend(ObjectStoreError::Unavailable("x".into()))),
            SnapError::StorageUnavailable(_)
        ));
        assert!(matches!(
            SnapError::from(StoreError::Corruption {
                fs: FsName::new("a"),
                message: "bad".into()
            }),
            SnapError::FatalCorruption { .. }
        ));
    }
}
