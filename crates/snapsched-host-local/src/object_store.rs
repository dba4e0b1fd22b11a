//! Object store over a metadata directory

use snapsched_host_api::{ObjectResult, ObjectStore, ObjectStoreError};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// One file per key inside a directory
///
/// `write_full` writes a temporary file in the same directory and renames it
/// over the key, so readers see either the old or the new object.
pub struct DirObjectStore {
    dir: PathBuf,
}

impl DirObjectStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &str) -> ObjectResult<PathBuf> {
        if key.is_empty() || key.contains('/') || key.starts_with('.') {
            return Err(ObjectStoreError::Unavailable(format!(
                "invalid object key '{}'",
                key
            )));
        }
        Ok(self.dir.join(key))
    }
}

fn map_io(key: &str, err: std::io::Error) -> ObjectStoreError {
    match err.kind() {
        ErrorKind::NotFound => ObjectStoreError::NotFound(key.to_string()),
        _ => ObjectStoreError::Unavailable(format!("{}: {}", key, err)),
    }
}

impl ObjectStore for DirObjectStore {
    fn stat(&self, key: &str) -> ObjectResult<u64> {
        let meta = std::fs::metadata(self.object_path(key)?).map_err(|e| map_io(key, e))?;
        Ok(meta.len())
    }

    fn read(&self, key: &str, size: u64) -> ObjectResult<Vec<u8>> {
        let file = std::fs::File::open(self.object_path(key)?).map_err(|e| map_io(key, e))?;
        let mut data = Vec::new();
        file.take(size)
            .read_to_end(&mut data)
            .map_err(|e| map_io(key, e))?;
        Ok(data)
    }

    fn write_full(&self, key: &str, data: &[u8]) -> ObjectResult<()> {
        let path = self.object_path(key)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| map_io(key, e))?;

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| map_io(key, e))?;
        tmp.write_all(data).map_err(|e| map_io(key, e))?;
        tmp.as_file().sync_all().map_err(|e| map_io(key, e))?;
        tmp.persist(&path).map_err(|e| map_io(key, e.error))?;

        debug!(key = %key, bytes = data.len(), dir = %self.dir.display(), "Object written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path());
        assert!(matches!(store.stat("snap_db_v0"), Err(ObjectStoreError::NotFound(_))));
        assert!(matches!(store.read("snap_db_v0", 10), Err(ObjectStoreError::NotFound(_))));
    }

    #[test]
    fn write_replaces_object() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path().join("meta"));

        store.write_full("snap_db_v0", b"first version").unwrap();
        store.write_full("snap_db_v0", b"second").unwrap();

        let size = store.stat("snap_db_v0").unwrap();
        assert_eq!(size, 6);
        assert_eq!(store.read("snap_db_v0", size).unwrap(), b"second");

        // Only the object itself remains, no temporaries
        let files: Vec<_> = std::fs::read_dir(dir.path().join("meta")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = DirObjectStore::new(dir.path());
        assert!(store.write_full("../escape", b"x").is_err());
    }
}
