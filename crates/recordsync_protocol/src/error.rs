//! Codec error types.

use thiserror::Error;

/// Result type for encode/decode operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding values and payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Bytes could not be deserialized into the requested type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A notification payload was malformed.
    #[error("invalid notification payload: {0}")]
    InvalidNotification(String),
}

impl CodecError {
    /// Creates an encode error from any displayable cause.
    pub fn encode(cause: impl std::fmt::Display) -> Self {
        Self::Encode(cause.to_string())
    }

    /// Creates a decode error from any displayable cause.
    pub fn decode(cause: impl std::fmt::Display) -> Self {
        Self::Decode(cause.to_string())
    }
}
