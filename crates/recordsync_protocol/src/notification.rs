//! Inbound change notifications.

use crate::error::{CodecError, CodecResult};
use crate::key::RecordKey;
use serde::{Deserialize, Serialize};

/// Best-effort payload of a remote change notification.
///
/// None of the fields are guaranteed to be present: a notification may name
/// the changed record id, only its logical path, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNotification {
    /// Namespace the change happened in.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Id of the changed record.
    #[serde(default, alias = "record_id")]
    pub key: Option<String>,
    /// Logical path of the changed record.
    #[serde(default)]
    pub path: Option<String>,
}

impl RemoteNotification {
    /// A notification that carries nothing but the fact that something changed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A notification naming a specific record.
    pub fn for_key(key: &RecordKey) -> Self {
        Self {
            namespace: None,
            key: Some(key.id().to_string()),
            path: Some(key.path().to_string()),
        }
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Parses a JSON notification payload as forwarded by platform glue.
    pub fn from_json(bytes: &[u8]) -> CodecResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::InvalidNotification(e.to_string()))
    }

    /// Returns false only if the notification names a different namespace.
    pub fn is_for_namespace(&self, namespace: &str) -> bool {
        self.namespace.as_deref().map_or(true, |n| n == namespace)
    }
}
