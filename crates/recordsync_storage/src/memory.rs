//! In-memory local store for testing.

use crate::error::{StorageError, StorageResult};
use crate::store::LocalStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: SystemTime,
}

/// An in-memory local store.
///
/// Suitable for unit and integration tests. Modification times default to
/// the wall clock at write time and can be overridden with
/// [`InMemoryStore::set_modified`].
///
/// # Example
///
/// ```rust
/// use recordsync_storage::{InMemoryStore, LocalStore};
/// use std::path::Path;
///
/// let store = InMemoryStore::new();
/// store.write_atomic(Path::new("a"), b"1").unwrap();
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    files: RwLock<BTreeMap<PathBuf, Entry>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns true if the store holds no files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// All stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.read().keys().cloned().collect()
    }

    /// Overrides the modification time of an existing file.
    pub fn set_modified(&self, path: &Path, modified: SystemTime) -> bool {
        match self.files.write().get_mut(path) {
            Some(entry) => {
                entry.modified = modified;
                true
            }
            None => false,
        }
    }

    fn check(path: &Path) -> StorageResult<()> {
        if path.as_os_str().is_empty() || path.is_absolute() {
            return Err(StorageError::InvalidPath(path.display().to_string()));
        }
        Ok(())
    }
}

impl LocalStore for InMemoryStore {
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        Self::check(path)?;
        Ok(self.files.read().get(path).map(|e| e.data.clone()))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        Self::check(path)?;
        self.files.write().insert(
            path.to_path_buf(),
            Entry {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn delete(&self, path: &Path) -> StorageResult<bool> {
        Self::check(path)?;
        Ok(self.files.write().remove(path).is_some())
    }

    fn modified(&self, path: &Path) -> StorageResult<Option<SystemTime>> {
        Self::check(path)?;
        Ok(self.files.read().get(path).map(|e| e.modified))
    }
}
