//! Error types for the sync engine.

use recordsync_protocol::{CodecError, RemoteError};
use recordsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The remote store rejected an operation that is not retried.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// A categorical failure disabled remote integration for this process.
    #[error("remote integration disabled")]
    RemoteDisabled,

    /// The network is unreachable; the operation resumes on reconnect.
    #[error("network unreachable")]
    Offline,

    /// The key cannot be used for this operation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Two different value types use the same type tag.
    #[error("type tag {tag} is already used by {existing}")]
    TypeTagConflict {
        /// The contested tag.
        tag: String,
        /// The type registered with it first.
        existing: String,
    },

    /// A background worker failed.
    #[error("worker error: {0}")]
    Worker(String),

    /// The engine has been shut down.
    #[error("engine shut down")]
    ShutDown,
}

impl SyncError {
    /// Returns true if the operation is resubmitted automatically later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Offline => true,
            _ => false,
        }
    }
}

/// Failure of a remote round trip, cloneable so one batch result can be
/// handed to every requester.
#[derive(Debug, Clone)]
pub(crate) enum RemoteFailure {
    Offline,
    Disabled,
    ShutDown,
    Failed(RemoteError),
}

impl From<RemoteFailure> for SyncError {
    fn from(failure: RemoteFailure) -> Self {
        match failure {
            RemoteFailure::Offline => SyncError::Offline,
            RemoteFailure::Disabled => SyncError::RemoteDisabled,
            RemoteFailure::ShutDown => SyncError::ShutDown,
            RemoteFailure::Failed(e) => SyncError::Remote(e),
        }
    }
}
