//! Filesystem client over a host directory

use snapsched_host_api::{FsClient, FsError, FsResult};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem client rooted at a host directory
///
/// Path `/a/b` of the managed filesystem is `<root>/a/b` on the host. The
/// snapshot directory below a path is created on first use, provided the
/// path itself exists.
pub struct LocalFs {
    root: PathBuf,
    snapshot_dir: String,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>, snapshot_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn is_snapshot_dir(&self, host: &Path) -> bool {
        host.file_name()
            .is_some_and(|name| name == self.snapshot_dir.as_str())
    }

    /// Create the snapshot directory at `host` when its owner exists.
    fn ensure_snapshot_dir(&self, path: &str, host: &Path) -> FsResult<()> {
        if host.is_dir() {
            return Ok(());
        }
        let owner = host
            .parent()
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        if !owner.is_dir() {
            return Err(FsError::NotFound(path.to_string()));
        }
        match std::fs::create_dir(host) {
            Ok(()) => {
                debug!(path = %host.display(), "Created snapshot directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(FsError::from_io(path, &e)),
        }
    }
}

impl FsClient for LocalFs {
    fn mkdir(&self, path: &str) -> FsResult<()> {
        let host = self.host_path(path);
        if let Some(parent) = host.parent()
            && self.is_snapshot_dir(parent)
        {
            let parent_path = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("/");
            self.ensure_snapshot_dir(parent_path, parent)?;
        }
        std::fs::create_dir(&host).map_err(|e| FsError::from_io(path, &e))
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let host = self.host_path(path);
        if self.is_snapshot_dir(&host)
            && !host.exists()
            && host.parent().is_some_and(|p| p.is_dir())
        {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&host).map_err(|e| FsError::from_io(path, &e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::from_io(path, &e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        std::fs::remove_dir(self.host_path(path)).map_err(|e| FsError::from_io(path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_dir_created_on_demand() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("vol")).unwrap();
        let fs = LocalFs::new(dir.path(), ".snap");

        assert!(fs.readdir("/vol/.snap").unwrap().is_empty());
        fs.mkdir("/vol/.snap/scheduled-2024-01-01-00_00_00").unwrap();
        assert!(dir.path().join("vol/.snap/scheduled-2024-01-01-00_00_00").is_dir());
        assert_eq!(
            fs.readdir("/vol/.snap").unwrap(),
            vec!["scheduled-2024-01-01-00_00_00".to_string()]
        );

        fs.rmdir("/vol/.snap/scheduled-2024-01-01-00_00_00").unwrap();
        assert!(fs.readdir("/vol/.snap").unwrap().is_empty());
    }

    #[test]
    fn missing_path_is_not_found() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), ".snap");

        assert!(matches!(fs.mkdir("/gone/.snap/s1"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.readdir("/gone/.snap"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.rmdir("/gone"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn root_path_maps_to_root_dir() {
        let dir = tempdir().unwrap();
        let fs = LocalFs::new(dir.path(), ".snap");
        fs.mkdir("/.snap/s1").unwrap();
        assert!(dir.path().join(".snap/s1").is_dir());
    }
}
