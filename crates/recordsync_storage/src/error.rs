//! Error types for local storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The relative path escapes the store or is absolute.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Another process holds the data directory lock.
    #[error("data directory is locked by another process")]
    Locked,

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),
}
