//! Local store trait definition.

use crate::error::StorageResult;
use std::path::Path;
use std::time::SystemTime;

/// A local byte store addressed by relative paths.
///
/// # Invariants
///
/// - `read` returns exactly the bytes last passed to `write_atomic` for that path
/// - `write_atomic` never leaves a partially written file visible to `read`
/// - `delete` of a missing path is not an error
/// - Stores must be `Send + Sync`; the engine calls them from worker threads
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Reads the file at `path`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn read(&self, path: &Path) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the file at `path` with `data`, creating parent folders.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()>;

    /// Deletes the file at `path`. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn delete(&self, path: &Path) -> StorageResult<bool>;

    /// Returns the modification time of the file at `path`, if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn modified(&self, path: &Path) -> StorageResult<Option<SystemTime>>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> StorageResult<bool> {
        Ok(self.modified(path)?.is_some())
    }
}
