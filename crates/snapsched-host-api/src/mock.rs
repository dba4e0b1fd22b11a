//! In-memory filesystem and object store for testing

use snapsched_util::{FsName, Result, SnapError};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    FsClient, FsConnector, FsError, FsResult, ObjectResult, ObjectStore, ObjectStoreError,
};

/// Mock filesystem holding a set of directory paths
///
/// A directory named like the snapshot directory (`.snap` by default) exists
/// implicitly below every real directory.
pub struct MockFs {
    dirs: Mutex<BTreeSet<String>>,
    virtual_dir: String,

    /// Configure mkdir to fail with this error
    pub fail_mkdir: Arc<Mutex<Option<FsError>>>,

    /// Configure rmdir to fail with this error
    pub fail_rmdir: Arc<Mutex<Option<FsError>>>,
}

impl MockFs {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());

        Self {
            dirs: Mutex::new(dirs),
            virtual_dir: ".snap".to_string(),
            fail_mkdir: Arc::new(Mutex::new(None)),
            fail_rmdir: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_virtual_dir(mut self, name: impl Into<String>) -> Self {
        self.virtual_dir = name.into();
        self
    }

    /// Create a directory and all of its ancestors.
    pub fn add_dir(&self, path: &str) {
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            dirs.insert(current.clone());
        }
    }

    /// Remove a directory and everything below it.
    pub fn remove_tree(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.dirs
            .lock()
            .unwrap()
            .retain(|d| d != path && !d.starts_with(&prefix));
    }

    pub fn exists(&self, path: &str) -> bool {
        let dirs = self.dirs.lock().unwrap();
        Self::exists_in(&dirs, path, &self.virtual_dir)
    }

    fn exists_in(dirs: &BTreeSet<String>, path: &str, virtual_dir: &str) -> bool {
        if dirs.contains(path) {
            return true;
        }
        match split_parent(path) {
            Some((parent, name)) if name == virtual_dir => {
                Self::exists_in(dirs, parent, virtual_dir)
            }
            _ => false,
        }
    }

    fn children(dirs: &BTreeSet<String>, path: &str) -> Vec<String> {
        dirs.iter()
            .filter_map(|d| match split_parent(d) {
                Some((parent, name)) if parent == path => Some(name.to_string()),
                _ => None,
            })
            .collect()
    }
}

impl Default for MockFs {
    fn default() -> Self {
        Self::new()
    }
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    let idx = path.rfind('/')?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { "/" } else { &path[..idx] };
    Some((parent, name))
}

impl FsClient for MockFs {
    fn mkdir(&self, path: &str) -> FsResult<()> {
        if let Some(err) = self.fail_mkdir.lock().unwrap().clone() {
            return Err(err);
        }

        let mut dirs = self.dirs.lock().unwrap();
        let (parent, _) = split_parent(path).ok_or_else(|| FsError::AlreadyExists(path.into()))?;
        if !Self::exists_in(&dirs, parent, &self.virtual_dir) {
            return Err(FsError::NotFound(parent.to_string()));
        }
        if !dirs.insert(path.to_string()) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        Ok(())
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let dirs = self.dirs.lock().unwrap();
        if !Self::exists_in(&dirs, path, &self.virtual_dir) {
            return Err(FsError::NotFound(path.to_string()));
        }
        Ok(Self::children(&dirs, path))
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        if let Some(err) = self.fail_rmdir.lock().unwrap().clone() {
            return Err(err);
        }

        let mut dirs = self.dirs.lock().unwrap();
        if !dirs.contains(path) {
            return Err(FsError::NotFound(path.to_string()));
        }
        if !Self::children(&dirs, path).is_empty() {
            return Err(FsError::Unavailable(format!("directory not empty: {}", path)));
        }
        dirs.remove(path);
        Ok(())
    }
}

/// Mock object store backed by a map
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,

    /// Configure write_full to fail
    pub fail_write: Arc<Mutex<bool>>,

    /// Configure stat and read to fail
    pub fail_read: Arc<Mutex<bool>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
            fail_write: Arc::new(Mutex::new(false)),
            fail_read: Arc::new(Mutex::new(false)),
        }
    }

    /// Place an object directly, bypassing failure toggles.
    pub fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Number of successful write_full calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn stat(&self, key: &str) -> ObjectResult<u64> {
        if *self.fail_read.lock().unwrap() {
            return Err(ObjectStoreError::Unavailable("mock read failure".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    fn read(&self, key: &str, size: u64) -> ObjectResult<Vec<u8>> {
        if *self.fail_read.lock().unwrap() {
            return Err(ObjectStoreError::Unavailable("mock read failure".into()));
        }
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        let len = data.len().min(size as usize);
        Ok(data[..len].to_vec())
    }

    fn write_full(&self, key: &str, data: &[u8]) -> ObjectResult<()> {
        if *self.fail_write.lock().unwrap() {
            return Err(ObjectStoreError::Unavailable("mock write failure".into()));
        }
        self.put(key, data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock connector over a fixed set of in-memory filesystems
pub struct MockConnector {
    filesystems: HashMap<FsName, (Arc<MockFs>, Arc<MemoryObjectStore>)>,
    default_fs: Option<FsName>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            filesystems: HashMap::new(),
            default_fs: None,
        }
    }

    /// Connector with one fresh filesystem, which is also the default
    pub fn single(name: &str) -> Self {
        Self::new().with_fs(
            name,
            Arc::new(MockFs::new()),
            Arc::new(MemoryObjectStore::new()),
        )
    }

    /// Register a filesystem; the first one registered becomes the default.
    pub fn with_fs(mut self, name: &str, fs: Arc<MockFs>, objects: Arc<MemoryObjectStore>) -> Self {
        let name = FsName::new(name);
        if self.default_fs.is_none() {
            self.default_fs = Some(name.clone());
        }
        self.filesystems.insert(name, (fs, objects));
        self
    }

    fn lookup(&self, fs: &FsName) -> Result<&(Arc<MockFs>, Arc<MemoryObjectStore>)> {
        self.filesystems
            .get(fs)
            .ok_or_else(|| SnapError::not_found(format!("unknown filesystem '{}'", fs)))
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl FsConnector for MockConnector {
    fn fs_client(&self, fs: &FsName) -> Result<Arc<dyn FsClient>> {
        let (client, _) = self.lookup(fs)?;
        Ok(client.clone())
    }

    fn object_store(&self, fs: &FsName) -> Result<Arc<dyn ObjectStore>> {
        let (_, objects) = self.lookup(fs)?;
        Ok(objects.clone())
    }

    fn default_fs(&self) -> Option<FsName> {
        self.default_fs.clone()
    }

    fn filesystems(&self) -> Vec<FsName> {
        let mut names: Vec<FsName> = self.filesystems.keys().cloned().collect();
        names.sort();
        names
    }
}
