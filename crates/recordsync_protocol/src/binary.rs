//! Opaque binary files as syncable values.

use crate::error::CodecResult;
use crate::policy::SyncPolicy;
use crate::syncable::Syncable;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Raw bytes plus the modification time of the file they came from.
///
/// Locally the file holds only `data`; the modification time is taken from
/// file metadata. Remotely the whole struct is stored so the time survives
/// the round trip. Two files are equal when their bytes are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryFile {
    /// File contents.
    pub data: Vec<u8>,
    /// Last modification time.
    pub modified: SystemTime,
}

impl BinaryFile {
    /// Wraps bytes modified at `modified`.
    pub fn new(data: Vec<u8>, modified: SystemTime) -> Self {
        Self { data, modified }
    }

    /// Wraps bytes modified now.
    pub fn now(data: Vec<u8>) -> Self {
        Self::new(data, SystemTime::now())
    }
}

impl PartialEq for BinaryFile {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Syncable for BinaryFile {
    fn type_tag() -> &'static str {
        "BinaryFile"
    }

    fn encode_local(&self) -> CodecResult<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn decode_local(bytes: &[u8], modified: Option<SystemTime>) -> CodecResult<Self> {
        Ok(Self::new(bytes.to_vec(), modified.unwrap_or(UNIX_EPOCH)))
    }
}

type BinaryMergeFn = Arc<dyn Fn(&BinaryFile, &BinaryFile) -> Option<BinaryFile> + Send + Sync>;

/// Default policy for [`BinaryFile`]: the more recently modified copy wins.
#[derive(Clone, Default)]
pub struct BinaryPolicy {
    merge: Option<BinaryMergeFn>,
}

impl BinaryPolicy {
    /// Creates the timestamp-only policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a merge closure, called as `merge(remote, local)` before timestamps are compared.
    pub fn with_merge(
        mut self,
        f: impl Fn(&BinaryFile, &BinaryFile) -> Option<BinaryFile> + Send + Sync + 'static,
    ) -> Self {
        self.merge = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for BinaryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryPolicy")
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

impl SyncPolicy<BinaryFile> for BinaryPolicy {
    fn merge(&self, remote: &BinaryFile, local: &BinaryFile) -> Option<BinaryFile> {
        self.merge.as_ref().and_then(|f| f(remote, local))
    }

    fn should_overwrite(&self, candidate: &BinaryFile, existing: &BinaryFile) -> bool {
        candidate.data != existing.data && candidate.modified > existing.modified
    }
}
