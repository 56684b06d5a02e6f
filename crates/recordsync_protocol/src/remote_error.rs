//! Remote store failure taxonomy.

use std::time::Duration;
use thiserror::Error;

/// Result type for remote store calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Categorical failures that disable remote integration for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalKind {
    /// The account is not signed in or credentials were rejected.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The account has no remaining storage quota.
    #[error("quota exceeded")]
    QuotaExceeded,
    /// The stored record schema is incompatible with this client.
    #[error("incompatible schema")]
    IncompatibleSchema,
    /// The service is permanently unavailable to this client.
    #[error("service unavailable")]
    Unavailable,
}

/// Errors returned by a remote record store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The expected version token no longer matches the stored record.
    #[error("record changed since it was fetched")]
    Conflict,

    /// The server asked the client to back off.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-supplied delay before the next attempt.
        retry_after: Duration,
    },

    /// The namespace is busy; the request can be retried.
    #[error("namespace busy")]
    Busy {
        /// Server-supplied delay, if any.
        retry_after: Option<Duration>,
    },

    /// The inline payload exceeds the store's record size limit.
    #[error("payload too large: {size} bytes")]
    TooLarge {
        /// Size of the rejected payload.
        size: usize,
    },

    /// The network is unreachable.
    #[error("network unavailable: {0}")]
    Network(String),

    /// Categorical failure.
    #[error("fatal remote error: {0}")]
    Fatal(FatalKind),

    /// Anything the client does not know how to classify.
    #[error("remote error: {0}")]
    Other(String),
}

/// How the client reacts to a remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stale version token: refetch and retry immediately.
    Conflict,
    /// Transient: wait (server delay if given, else back-off) and retry unchanged.
    RetryAfter(Option<Duration>),
    /// Spill the payload to a blob and retry.
    TooLarge,
    /// Offline: abandon now, recovery resubmits on reconnect.
    Offline,
    /// Disable remote integration for the process lifetime.
    Fatal(FatalKind),
    /// Log and abandon this operation only.
    Unclassified,
}

impl RemoteError {
    /// Classifies this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::Conflict => ErrorClass::Conflict,
            RemoteError::RateLimited { retry_after } => ErrorClass::RetryAfter(Some(*retry_after)),
            RemoteError::Busy { retry_after } => ErrorClass::RetryAfter(*retry_after),
            RemoteError::TooLarge { .. } => ErrorClass::TooLarge,
            RemoteError::Network(_) => ErrorClass::Offline,
            RemoteError::Fatal(kind) => ErrorClass::Fatal(*kind),
            RemoteError::Other(_) => ErrorClass::Unclassified,
        }
    }

    /// Returns true if the error is retried automatically.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Conflict | ErrorClass::RetryAfter(_) | ErrorClass::TooLarge
        )
    }
}
