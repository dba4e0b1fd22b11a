//! Connector over locally configured filesystems

use snapsched_host_api::{FsClient, FsConnector, ObjectStore};
use snapsched_util::{FsName, Result, SnapError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::{DirObjectStore, LocalFs};

struct LocalFilesystem {
    client: Arc<LocalFs>,
    objects: Arc<DirObjectStore>,
}

/// Maps filesystem names to directory-backed clients
pub struct LocalConnector {
    filesystems: BTreeMap<FsName, LocalFilesystem>,
    default_fs: Option<FsName>,
    snapshot_dir: String,
}

impl LocalConnector {
    pub fn new(snapshot_dir: impl Into<String>) -> Self {
        Self {
            filesystems: BTreeMap::new(),
            default_fs: None,
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// Register a filesystem rooted at `root` whose schedule database lives
    /// in `metadata_dir`.
    pub fn add_filesystem(
        &mut self,
        name: FsName,
        root: impl Into<PathBuf>,
        metadata_dir: impl Into<PathBuf>,
    ) {
        let root = root.into();
        let metadata_dir = metadata_dir.into();
        info!(
            fs = %name,
            root = %root.display(),
            metadata_dir = %metadata_dir.display(),
            "Registered local filesystem"
        );

        self.filesystems.insert(
            name,
            LocalFilesystem {
                client: Arc::new(LocalFs::new(root, self.snapshot_dir.clone())),
                objects: Arc::new(DirObjectStore::new(metadata_dir)),
            },
        );
    }

    pub fn set_default_fs(&mut self, name: FsName) {
        self.default_fs = Some(name);
    }

    fn lookup(&self, fs: &FsName) -> Result<&LocalFilesystem> {
        self.filesystems
            .get(fs)
            .ok_or_else(|| SnapError::not_found(format!("unknown filesystem '{}'", fs)))
    }
}

impl FsConnector for LocalConnector {
    fn fs_client(&self, fs: &FsName) -> Result<Arc<dyn FsClient>> {
        Ok(self.lookup(fs)?.client.clone())
    }

    fn object_store(&self, fs: &FsName) -> Result<Arc<dyn ObjectStore>> {
        Ok(self.lookup(fs)?.objects.clone())
    }

    /// The configured default, or the only filesystem when there is one
    fn default_fs(&self) -> Option<FsName> {
        if self.default_fs.is_some() {
            return self.default_fs.clone();
        }
        if self.filesystems.len() == 1 {
            return self.filesystems.keys().next().cloned();
        }
        None
    }

    fn filesystems(&self) -> Vec<FsName> {
        self.filesystems.keys().cloned().collect()
    }
}
