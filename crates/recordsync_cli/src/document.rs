//! JSON documents synced by the CLI.

use recordsync_protocol::{CodecError, CodecResult, FnPolicy, SyncPolicy, Syncable};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A JSON value with a revision counter.
///
/// Local files hold pretty-printed JSON; the remote store holds CBOR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDocument {
    /// Monotonic revision; the higher revision wins a conflict.
    pub revision: u64,
    /// Milliseconds since the Unix epoch when this revision was written.
    pub written_at: u64,
    /// Document body.
    pub body: Value,
}

impl JsonDocument {
    /// Creates a document at `revision`, stamped with the current time.
    pub fn new(revision: u64, body: Value) -> Self {
        let written_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            revision,
            written_at,
            body,
        }
    }

    /// Placeholder payload carried by tombstones.
    pub fn empty() -> Self {
        Self {
            revision: 0,
            written_at: 0,
            body: Value::Null,
        }
    }

    fn outranks(&self, other: &Self) -> bool {
        (self.revision, self.written_at) > (other.revision, other.written_at)
    }
}

impl Syncable for JsonDocument {
    fn type_tag() -> &'static str {
        "JsonDocument"
    }

    fn encode_local(&self) -> CodecResult<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(CodecError::encode)
    }

    fn decode_local(bytes: &[u8], _modified: Option<SystemTime>) -> CodecResult<Self> {
        serde_json::from_slice(bytes).map_err(CodecError::decode)
    }
}

/// Conflict policy for documents.
///
/// The higher revision (then the later write) replaces the other side. With
/// `merge_objects`, two JSON objects are merged key by key first, remote keys
/// taking precedence, and the result gets the next revision.
pub fn policy(merge_objects: bool) -> Arc<dyn SyncPolicy<JsonDocument>> {
    let mut policy = FnPolicy::new().with_overwrite(|candidate: &JsonDocument, existing: &JsonDocument| {
        candidate.outranks(existing)
    });
    if merge_objects {
        policy = policy.with_merge(merge);
    }
    Arc::new(policy)
}

fn merge(remote: &JsonDocument, local: &JsonDocument) -> Option<JsonDocument> {
    let (Value::Object(remote_fields), Value::Object(local_fields)) = (&remote.body, &local.body)
    else {
        return None;
    };
    let mut fields = local_fields.clone();
    for (name, value) in remote_fields {
        fields.insert(name.clone(), value.clone());
    }
    if fields == *remote_fields {
        return None;
    }
    Some(JsonDocument::new(
        remote.revision.max(local.revision) + 1,
        Value::Object(fields),
    ))
}
