//! Directory-backed local store.
//!
//! Layout of a data directory:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK                      # Advisory lock for a single engine per directory
//! └─ <relative paths>          # One file per synced item, plus the ledger
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::LocalStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const LOCK_FILE: &str = "LOCK";

/// A local store rooted at a data directory.
///
/// # Durability
///
/// Writes use the write-then-rename pattern: the bytes go to a uniquely named
/// temporary file beside the target, which is synced, renamed over the target,
/// and finally the parent directory is synced.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on the directory, so only one
/// `FileStore` can exist per directory at a time across processes.
///
/// # Example
///
/// ```no_run
/// use recordsync_storage::{FileStore, LocalStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("data"), true).unwrap();
/// store.write_atomic(Path::new("notes/today.json"), b"{}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    base: PathBuf,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a data directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(base: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !base.exists() {
            if create_if_missing {
                fs::create_dir_all(base)?;
            } else {
                return Err(StorageError::InvalidPath(format!(
                    "data directory does not exist: {}",
                    base.display()
                )));
            }
        }

        if !base.is_dir() {
            return Err(StorageError::InvalidPath(format!(
                "not a directory: {}",
                base.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(base.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            base: base.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolves a relative path inside the data directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` for absolute paths, `..` components and the lock file.
    pub fn resolve(&self, relative: &Path) -> StorageResult<PathBuf> {
        let mut out = self.base.clone();
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    out.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => {
                    return Err(StorageError::InvalidPath(relative.display().to_string()));
                }
            }
        }
        if depth == 0 || relative == Path::new(LOCK_FILE) {
            return Err(StorageError::InvalidPath(relative.display().to_string()));
        }
        Ok(out)
    }

    #[cfg(unix)]
    fn sync_directory(dir: &Path) -> StorageResult<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(_dir: &Path) -> StorageResult<()> {
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        let full = self.resolve(path)?;
        let parent = full
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base.clone());
        fs::create_dir_all(&parent)?;

        let file_name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let mut file = File::create(&temp_path)?;
        if let Err(e) = file.write_all(data).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Self::sync_directory(&parent)?;

        debug!(path = %path.display(), bytes = data.len(), "wrote local file");
        Ok(())
    }

    fn delete(&self, path: &Path) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => {
                if let Some(parent) = full.parent() {
                    Self::sync_directory(parent)?;
                }
                debug!(path = %path.display(), "deleted local file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn modified(&self, path: &Path) -> StorageResult<Option<SystemTime>> {
        let full = self.resolve(path)?;
        match fs::metadata(&full) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.modified()?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
