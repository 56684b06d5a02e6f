//! Remote record store abstraction.

use async_trait::async_trait;
use parking_lot::Mutex;
use recordsync_protocol::{
    BlobRef, Payload, RecordDraft, RecordKey, RecordVersion, RemoteError, RemoteResult,
    RemoteSnapshot, VersionToken,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A remote record store holding one versioned record per key.
///
/// This trait abstracts the network layer. Implementations map their own
/// failures onto [`RemoteError`]; the client decides how to react through
/// [`RemoteError::class`].
///
/// # Write contract
///
/// `write` is a compare-and-swap: with an unknown `expected` token it only
/// creates, otherwise `expected` must equal the stored version. On success a
/// fresh version token is returned. A [`Payload::Blob`] draft points at a
/// local file whose bytes the store must persist before returning.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Opens the namespace. Called once before any other request.
    async fn ensure_namespace_ready(&self, namespace: &str) -> RemoteResult<()>;

    /// Fetches several records in one round trip. Missing keys are absent from the map.
    async fn fetch_batch(
        &self,
        keys: &[RecordKey],
    ) -> RemoteResult<HashMap<RecordKey, RemoteSnapshot>>;

    /// Fetches one record.
    async fn fetch(&self, key: &RecordKey) -> RemoteResult<Option<RemoteSnapshot>> {
        let mut found = self.fetch_batch(std::slice::from_ref(key)).await?;
        Ok(found.remove(key))
    }

    /// Writes a record if `expected` matches the stored version.
    async fn write(&self, draft: &RecordDraft, expected: &VersionToken)
        -> RemoteResult<VersionToken>;

    /// Lists key and version of every record matched by `pattern`,
    /// optionally restricted to one type tag.
    async fn query(
        &self,
        pattern: &RecordKey,
        type_tag: Option<&str>,
    ) -> RemoteResult<Vec<RecordVersion>>;

    /// Asks the store to send change notifications for `pattern`.
    async fn subscribe(&self, pattern: &RecordKey) -> RemoteResult<()>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: RecordKey,
    version: VersionToken,
    bytes: Vec<u8>,
    blob: bool,
    deleted: bool,
    type_tag: String,
}

/// An in-memory remote store for testing.
///
/// Supports an inline size limit, reachability toggling, latency and
/// one-shot failure injection per operation kind, and exposes counters so
/// tests can assert on network traffic.
pub struct MemoryRemoteStore {
    records: Mutex<BTreeMap<String, StoredRecord>>,
    next_version: AtomicU64,
    max_inline: Option<usize>,
    reachable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    ready_failures: Mutex<VecDeque<RemoteError>>,
    fetch_failures: Mutex<VecDeque<RemoteError>>,
    write_failures: Mutex<VecDeque<RemoteError>>,
    subscriptions: Mutex<Vec<RecordKey>>,
    blob_dir: PathBuf,
    ready_calls: AtomicUsize,
    fetch_round_trips: AtomicUsize,
    write_attempts: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemoteStore {
    /// Creates an empty store without a size limit.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
            max_inline: None,
            reachable: AtomicBool::new(true),
            latency: Mutex::new(None),
            ready_failures: Mutex::new(VecDeque::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            write_failures: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            blob_dir: std::env::temp_dir()
                .join("recordsync-memory-remote")
                .join(uuid::Uuid::new_v4().to_string()),
            ready_calls: AtomicUsize::new(0),
            fetch_round_trips: AtomicUsize::new(0),
            write_attempts: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Rejects inline payloads larger than `bytes` with [`RemoteError::TooLarge`].
    pub fn with_max_inline(mut self, bytes: usize) -> Self {
        self.max_inline = Some(bytes);
        self
    }

    /// Toggles reachability. While unreachable every call fails with a network error.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Fails the next ready-gate call with `error`.
    pub fn fail_next_ready(&self, error: RemoteError) {
        self.ready_failures.lock().push_back(error);
    }

    /// Fails the next fetch round trip with `error`.
    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.fetch_failures.lock().push_back(error);
    }

    /// Fails the next write with `error`.
    pub fn fail_next_write(&self, error: RemoteError) {
        self.write_failures.lock().push_back(error);
    }

    /// Stores a record directly, bypassing version checks. Returns its new version.
    pub fn seed(
        &self,
        key: &RecordKey,
        bytes: Vec<u8>,
        deleted: bool,
        type_tag: impl Into<String>,
    ) -> VersionToken {
        let version = self.next_token();
        self.records.lock().insert(
            key.id().to_string(),
            StoredRecord {
                key: key.clone(),
                version: version.clone(),
                bytes,
                blob: false,
                deleted,
                type_tag: type_tag.into(),
            },
        );
        version
    }

    /// Returns the stored record with its bytes inline, for inspection.
    pub fn record(&self, key: &RecordKey) -> Option<RemoteSnapshot> {
        self.records.lock().get(key.id()).map(|r| RemoteSnapshot {
            key: r.key.clone(),
            version: r.version.clone(),
            payload: Payload::Inline(r.bytes.clone()),
            deleted: r.deleted,
            type_tag: r.type_tag.clone(),
        })
    }

    /// Returns true if the record's payload was stored out of band.
    pub fn is_blob(&self, key: &RecordKey) -> bool {
        self.records
            .lock()
            .get(key.id())
            .map_or(false, |r| r.blob)
    }

    /// Number of stored records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Subscribed patterns, in subscription order.
    pub fn subscriptions(&self) -> Vec<RecordKey> {
        self.subscriptions.lock().clone()
    }

    /// Number of ready-gate calls.
    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    /// Number of fetch round trips.
    pub fn fetch_round_trips(&self) -> usize {
        self.fetch_round_trips.load(Ordering::SeqCst)
    }

    /// Number of write calls, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn next_token(&self) -> VersionToken {
        VersionToken::new(format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst)))
    }

    async fn round_trip(&self, injected: &Mutex<VecDeque<RemoteError>>) -> RemoteResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Network("remote store unreachable".into()));
        }
        match injected.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn snapshot_of(&self, record: &StoredRecord) -> RemoteResult<RemoteSnapshot> {
        let payload = if record.blob {
            std::fs::create_dir_all(&self.blob_dir)
                .map_err(|e| RemoteError::Other(format!("blob dir: {e}")))?;
            let path = self
                .blob_dir
                .join(format!("{}.blob", uuid::Uuid::new_v4()));
            std::fs::write(&path, &record.bytes)
                .map_err(|e| RemoteError::Other(format!("blob write: {e}")))?;
            Payload::Blob(BlobRef::new(path))
        } else {
            Payload::Inline(record.bytes.clone())
        };
        Ok(RemoteSnapshot {
            key: record.key.clone(),
            version: record.version.clone(),
            payload,
            deleted: record.deleted,
            type_tag: record.type_tag.clone(),
        })
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryRemoteStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.blob_dir);
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("records", &self.len())
            .field("max_inline", &self.max_inline)
            .field("reachable", &self.reachable.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn ensure_namespace_ready(&self, _namespace: &str) -> RemoteResult<()> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        self.round_trip(&self.ready_failures).await
    }

    async fn fetch_batch(
        &self,
        keys: &[RecordKey],
    ) -> RemoteResult<HashMap<RecordKey, RemoteSnapshot>> {
        self.fetch_round_trips.fetch_add(1, Ordering::SeqCst);
        self.round_trip(&self.fetch_failures).await?;

        let stored: Vec<StoredRecord> = {
            let records = self.records.lock();
            keys.iter()
                .filter_map(|k| records.get(k.id()).cloned())
                .collect()
        };
        stored
            .iter()
            .map(|r| Ok((r.key.clone(), self.snapshot_of(r)?)))
            .collect()
    }

    async fn write(
        &self,
        draft: &RecordDraft,
        expected: &VersionToken,
    ) -> RemoteResult<VersionToken> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        self.round_trip(&self.write_failures).await?;

        let (bytes, blob) = match &draft.payload {
            Payload::Inline(bytes) => {
                if let Some(max) = self.max_inline {
                    if bytes.len() > max {
                        return Err(RemoteError::TooLarge { size: bytes.len() });
                    }
                }
                (bytes.clone(), false)
            }
            Payload::Blob(blob) => {
                let bytes = std::fs::read(&blob.path)
                    .map_err(|e| RemoteError::Other(format!("blob read: {e}")))?;
                (bytes, true)
            }
        };

        let mut records = self.records.lock();
        let current = records.get(draft.key.id()).map(|r| r.version.clone());
        let matches = match &current {
            None => expected.is_unknown(),
            Some(version) => version == expected,
        };
        if !matches {
            return Err(RemoteError::Conflict);
        }

        let version = self.next_token();
        records.insert(
            draft.key.id().to_string(),
            StoredRecord {
                key: draft.key.clone(),
                version: version.clone(),
                bytes,
                blob,
                deleted: draft.deleted,
                type_tag: draft.type_tag.clone(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }

    async fn query(
        &self,
        pattern: &RecordKey,
        type_tag: Option<&str>,
    ) -> RemoteResult<Vec<RecordVersion>> {
        self.round_trip(&self.fetch_failures).await?;
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| pattern.matches(&r.key))
            .filter(|r| type_tag.map_or(true, |t| t == r.type_tag))
            .map(|r| RecordVersion {
                key: r.key.clone(),
                version: r.version.clone(),
                deleted: r.deleted,
            })
            .collect())
    }

    async fn subscribe(&self, pattern: &RecordKey) -> RemoteResult<()> {
        self.round_trip(&self.fetch_failures).await?;
        let mut subs = self.subscriptions.lock();
        if !subs.contains(pattern) {
            subs.push(pattern.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recordsync_protocol::StorageRoot;

    fn key(path: &str) -> RecordKey {
        RecordKey::new(path, StorageRoot::ApplicationSupport)
    }

    #[tokio::test]
    async fn create_requires_unknown_token() {
        let store = MemoryRemoteStore::new();
        let draft = RecordDraft::new(key("a"), vec![1], false, "Doc");

        let v1 = store.write(&draft, &VersionToken::unknown()).await.unwrap();
        assert!(!v1.is_unknown());

        let again = store.write(&draft, &VersionToken::unknown()).await;
        assert_eq!(again, Err(RemoteError::Conflict));

        let v2 = store.write(&draft, &v1).await.unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.write(&draft, &v1).await, Err(RemoteError::Conflict));
        assert_eq!(store.writes(), 2);
        assert_eq!(store.write_attempts(), 4);
    }

    #[tokio::test]
    async fn size_limit_and_blobs() {
        let store = MemoryRemoteStore::new().with_max_inline(4);
        let big = RecordDraft::new(key("big"), vec![9; 10], false, "Doc");
        assert_eq!(
            store.write(&big, &VersionToken::unknown()).await,
            Err(RemoteError::TooLarge { size: 10 })
        );

        let dir = tempfile::tempdir().unwrap();
        let blob_path = dir.path().join("spill");
        std::fs::write(&blob_path, vec![9; 10]).unwrap();
        let mut spilled = big.clone();
        spilled.payload = Payload::Blob(BlobRef::new(&blob_path));
        store.write(&spilled, &VersionToken::unknown()).await.unwrap();
        std::fs::remove_file(&blob_path).unwrap();
        assert!(store.is_blob(&key("big")));

        let fetched = store.fetch(&key("big")).await.unwrap().unwrap();
        match fetched.payload {
            Payload::Blob(b) => assert_eq!(std::fs::read(b.path).unwrap(), vec![9; 10]),
            Payload::Inline(_) => panic!("expected blob payload"),
        }
    }

    #[tokio::test]
    async fn unreachable_and_injected_failures() {
        let store = MemoryRemoteStore::new();
        store.set_reachable(false);
        assert!(matches!(
            store.ensure_namespace_ready("ns").await,
            Err(RemoteError::Network(_))
        ));
        store.set_reachable(true);

        store.fail_next_fetch(RemoteError::Busy { retry_after: None });
        assert!(store.fetch(&key("a")).await.is_err());
        assert_eq!(store.fetch(&key("a")).await, Ok(None));
        assert_eq!(store.fetch_round_trips(), 2);
    }

    #[tokio::test]
    async fn query_filters_by_pattern_and_type() {
        let store = MemoryRemoteStore::new();
        store.seed(&key("saves/1"), vec![], false, "Doc");
        store.seed(&key("saves/2"), vec![], true, "Doc");
        store.seed(&key("saves/3"), vec![], false, "Other");
        store.seed(&key("other"), vec![], false, "Doc");

        let all = store.query(&key("saves/"), None).await.unwrap();
        assert_eq!(all.len(), 3);
        let docs = store.query(&key("saves/"), Some("Doc")).await.unwrap();
        assert_eq!(docs.len(), 2);
        let exact = store.query(&key("other"), None).await.unwrap();
        assert_eq!(exact.len(), 1);
    }

    #[tokio::test]
    async fn subscriptions_deduplicated() {
        let store = MemoryRemoteStore::new();
        store.subscribe(&key("a/")).await.unwrap();
        store.subscribe(&key("a/")).await.unwrap();
        assert_eq!(store.subscriptions(), vec![key("a/")]);
    }
}
