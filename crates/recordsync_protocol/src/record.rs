//! Remote record model.

use crate::key::RecordKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Opaque version token issued by the remote store on every successful write.
///
/// Tokens are compared for equality only (compare-and-swap precondition);
/// they carry no ordering. The empty token means "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(String);

impl VersionToken {
    /// Creates a token from the store's representation.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The "unknown" token, used when no remote version has been seen.
    pub fn unknown() -> Self {
        Self(String::new())
    }

    /// Returns true if no remote version is known.
    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("<unknown>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Reference to an out-of-band blob holding a payload too large to inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Local file holding the blob bytes.
    pub path: PathBuf,
}

impl BlobRef {
    /// Creates a reference to a blob stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Record payload: inline bytes or a blob reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Bytes stored inside the record.
    Inline(Vec<u8>),
    /// Bytes stored out of band.
    Blob(BlobRef),
}

impl Payload {
    /// Returns the inline bytes, if any.
    pub fn inline(&self) -> Option<&[u8]> {
        match self {
            Payload::Inline(bytes) => Some(bytes),
            Payload::Blob(_) => None,
        }
    }

    /// Returns true if the payload has been spilled to a blob.
    pub fn is_blob(&self) -> bool {
        matches!(self, Payload::Blob(_))
    }
}

/// A record as fetched from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Record key.
    pub key: RecordKey,
    /// Current version token.
    pub version: VersionToken,
    /// Payload bytes or blob reference.
    pub payload: Payload,
    /// Whether the record is a deletion tombstone.
    pub deleted: bool,
    /// Type tag of the value stored in the payload.
    pub type_tag: String,
}

/// A record write about to be submitted to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Record key.
    pub key: RecordKey,
    /// Payload to store.
    pub payload: Payload,
    /// Whether this write is a deletion tombstone.
    pub deleted: bool,
    /// Type tag of the value in the payload.
    pub type_tag: String,
}

impl RecordDraft {
    /// Creates a draft with an inline payload.
    pub fn new(key: RecordKey, bytes: Vec<u8>, deleted: bool, type_tag: impl Into<String>) -> Self {
        Self {
            key,
            payload: Payload::Inline(bytes),
            deleted,
            type_tag: type_tag.into(),
        }
    }
}

/// Key and version of a remote record, as returned by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVersion {
    /// Record key.
    pub key: RecordKey,
    /// Current version token.
    pub version: VersionToken,
    /// Whether the record is a deletion tombstone.
    pub deleted: bool,
}
