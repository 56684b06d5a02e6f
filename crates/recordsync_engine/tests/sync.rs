//! Integration tests: engines against a shared in-memory remote store.

use parking_lot::Mutex;
use recordsync_engine::{
    local_path, ChangedItem, Liveness, MemoryRemoteStore, Reachability, RetryConfig, SyncConfig,
    SyncEngine,
};
use recordsync_protocol::{
    cbor_decode, cbor_encode, Decision, FatalKind, FnPolicy, NeverOverwrite, Ordered, RecordKey,
    RemoteError, StorageRoot, SyncPolicy, Syncable,
};
use recordsync_storage::{InMemoryStore, LocalStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
struct Doc {
    v: i64,
    #[serde(default)]
    body: String,
}

impl Syncable for Doc {
    fn type_tag() -> &'static str {
        "Doc"
    }
}

fn doc(v: i64) -> Doc {
    Doc {
        v,
        body: String::new(),
    }
}

fn doc_with(v: i64, body: &str) -> Doc {
    Doc {
        v,
        body: body.to_string(),
    }
}

struct Node {
    engine: SyncEngine,
    local: Arc<InMemoryStore>,
    _blobs: TempDir,
}

impl Node {
    fn start(remote: &Arc<MemoryRemoteStore>) -> Self {
        Self::with_local(remote, Arc::new(InMemoryStore::new()))
    }

    fn with_local(remote: &Arc<MemoryRemoteStore>, local: Arc<InMemoryStore>) -> Self {
        let blobs = tempfile::tempdir().unwrap();
        let config = SyncConfig::new("test")
            .with_fetch_debounce(Duration::from_millis(20))
            .with_retry(RetryConfig::immediate())
            .with_remote_compression(false)
            .with_blob_dir(blobs.path());
        let engine = SyncEngine::init(config, local.clone(), remote.clone()).unwrap();
        Self {
            engine,
            local,
            _blobs: blobs,
        }
    }

    fn key(&self, path: &str) -> RecordKey {
        self.engine.key(path, StorageRoot::Documents)
    }

    /// Puts `value` in the local file without going through the engine.
    fn put_local(&self, key: &RecordKey, value: &Doc) {
        self.local
            .write_atomic(&local_path(key, false), &cbor_encode(value).unwrap())
            .unwrap();
    }

    fn local_doc(&self, key: &RecordKey) -> Option<Doc> {
        self.local
            .read(&local_path(key, false))
            .unwrap()
            .map(|bytes| cbor_decode(&bytes).unwrap())
    }
}

fn remote_doc(remote: &MemoryRemoteStore, key: &RecordKey) -> Option<Doc> {
    let snapshot = remote.record(key)?;
    if snapshot.deleted {
        return None;
    }
    Some(cbor_decode(snapshot.payload.inline()?).unwrap())
}

fn ordered() -> Arc<dyn SyncPolicy<Doc>> {
    Arc::new(Ordered)
}

type Loads = Arc<Mutex<Vec<(Option<Doc>, bool)>>>;

fn recorder() -> (Loads, impl Fn(Option<Doc>, bool) + Send + Sync + 'static) {
    let seen: Loads = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |value, from_remote| sink.lock().push((value, from_remote)))
}

#[tokio::test]
async fn first_save_creates_remote_record() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    let finals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finals);
    node.engine
        .save(&doc(1), &key, ordered(), move |v| sink.lock().push(v))
        .unwrap();
    assert_eq!(node.local_doc(&key), Some(doc(1)));

    node.engine.wait_idle().await;

    assert_eq!(remote_doc(&remote, &key), Some(doc(1)));
    let known = node.engine.known_record(&key).unwrap();
    assert!(!known.version.is_unknown());
    assert!(!known.pending_save);
    assert_eq!(*finals.lock(), vec![doc(1)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_engines_converge_on_greater_value() {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.set_latency(Some(Duration::from_millis(2)));
    let a = Node::start(&remote);
    let b = Node::start(&remote);
    let key = a.key("a");

    a.engine.save(&doc(2), &key, ordered(), |_| {}).unwrap();
    b.engine.save(&doc(5), &key, ordered(), |_| {}).unwrap();
    a.engine.wait_idle().await;
    b.engine.wait_idle().await;

    a.engine.load(&key, ordered(), |_, _| {}).unwrap();
    b.engine.load(&key, ordered(), |_, _| {}).unwrap();
    a.engine.wait_idle().await;
    b.engine.wait_idle().await;

    assert_eq!(remote_doc(&remote, &key), Some(doc(5)));
    assert_eq!(a.local_doc(&key), Some(doc(5)));
    assert_eq!(b.local_doc(&key), Some(doc(5)));

    // Each confirmed push is exactly one stored write.
    let pushes = a.engine.stats().pushes + b.engine.stats().pushes;
    assert_eq!(pushes as usize, remote.writes());
}

#[tokio::test]
async fn surviving_local_copy_undeletes_remote() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");
    let keep: Arc<dyn SyncPolicy<Doc>> = Arc::new(FnPolicy::<Doc>::new().with_delete(|_, _| false));

    node.engine.save(&doc(2), &key, keep.clone(), |_| {}).unwrap();
    node.engine.wait_idle().await;
    remote.seed(&key, Vec::new(), true, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, keep, on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(node.local_doc(&key), Some(doc(2)));
    let record = remote.record(&key).unwrap();
    assert!(!record.deleted);
    assert_eq!(remote_doc(&remote, &key), Some(doc(2)));
    assert_eq!(*seen.lock(), vec![(Some(doc(2)), false), (Some(doc(2)), true)]);
}

#[tokio::test]
async fn delete_decision_sees_deleted_value() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    // Follow a deletion only if it removed the version this replica holds.
    let same_only: Arc<dyn SyncPolicy<Doc>> =
        Arc::new(FnPolicy::<Doc>::new().with_delete(|local, deleted| deleted == Some(local)));

    let unchanged = node.key("unchanged");
    node.put_local(&unchanged, &doc(2));
    remote.seed(&unchanged, cbor_encode(&doc(2)).unwrap(), true, "Doc");

    let edited = node.key("edited");
    node.put_local(&edited, &doc(3));
    remote.seed(&edited, cbor_encode(&doc(2)).unwrap(), true, "Doc");

    let (unchanged_seen, on_unchanged) = recorder();
    node.engine.load(&unchanged, same_only.clone(), on_unchanged).unwrap();
    let (edited_seen, on_edited) = recorder();
    node.engine.load(&edited, same_only, on_edited).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(node.local_doc(&unchanged), None);
    assert_eq!(*unchanged_seen.lock(), vec![(Some(doc(2)), false), (None, true)]);

    assert_eq!(node.local_doc(&edited), Some(doc(3)));
    assert_eq!(remote_doc(&remote, &edited), Some(doc(3)));
    assert_eq!(*edited_seen.lock(), vec![(Some(doc(3)), false), (Some(doc(3)), true)]);
}

#[tokio::test]
async fn remote_tombstone_deletes_local_copy() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    node.engine.save(&doc(2), &key, ordered(), |_| {}).unwrap();
    node.engine.wait_idle().await;
    remote.seed(&key, Vec::new(), true, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, ordered(), on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(node.local_doc(&key), None);
    assert_eq!(*seen.lock(), vec![(Some(doc(2)), false), (None, true)]);
}

#[tokio::test]
async fn oversized_payload_spills_to_blob() {
    let remote = Arc::new(MemoryRemoteStore::new().with_max_inline(64));
    let node = Node::start(&remote);
    let key = node.key("big");
    let big = Doc {
        v: 1,
        body: "x".repeat(4096),
    };

    node.engine.save(&big, &key, ordered(), |_| {}).unwrap();
    node.engine.wait_idle().await;

    assert!(remote.is_blob(&key));
    assert_eq!(remote_doc(&remote, &key), Some(big.clone()));
    assert_eq!(node.engine.stats().blob_spills, 1);

    // A second replica reads it back through the blob reference.
    let other = Node::start(&remote);
    let (seen, on_loaded) = recorder();
    other.engine.load(&key, ordered(), on_loaded).unwrap();
    other.engine.wait_idle().await;
    assert_eq!(*seen.lock(), vec![(Some(big.clone()), true)]);
    assert_eq!(other.local_doc(&key), Some(big));
}

#[tokio::test]
async fn offline_save_resubmits_on_reconnect() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    node.engine.set_reachability(Reachability::Unreachable);
    node.engine.save(&doc(1), &key, ordered(), |_| {}).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(node.local_doc(&key), Some(doc(1)));
    assert!(node.engine.known_record(&key).unwrap().pending_save);
    assert_eq!(remote.writes(), 0);

    node.engine.set_reachability(Reachability::Wifi);
    node.engine.wait_idle().await;

    assert_eq!(remote_doc(&remote, &key), Some(doc(1)));
    assert!(!node.engine.known_record(&key).unwrap().pending_save);
}

#[tokio::test]
async fn deleting_twice_writes_one_tombstone() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    node.engine.save(&doc(1), &key, ordered(), |_| {}).unwrap();
    node.engine.wait_idle().await;
    let writes = remote.writes();

    assert!(node.engine.delete(&doc(1), &key).unwrap());
    node.engine.wait_idle().await;
    assert!(!node.engine.delete(&doc(1), &key).unwrap());
    node.engine.wait_idle().await;

    assert!(remote.record(&key).unwrap().deleted);
    assert_eq!(remote.writes(), writes + 1);
    assert!(node.engine.known_record(&key).is_none());
}

#[tokio::test]
async fn restart_resubmits_pending_saves() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(InMemoryStore::new());
    let key = RecordKey::new("a", StorageRoot::Documents);

    let first = Node::with_local(&remote, local.clone());
    first.engine.set_reachability(Reachability::Unreachable);
    first.engine.save(&doc(7), &key, ordered(), |_| {}).unwrap();
    first.engine.wait_idle().await;
    first.engine.shutdown().await.unwrap();
    drop(first);
    assert_eq!(remote.writes(), 0);

    let second = Node::with_local(&remote, local);
    assert!(second.engine.known_record(&key).unwrap().pending_save);

    // First use of the type resubmits its pending records.
    let other = second.key("unrelated");
    second.engine.load(&other, ordered(), |_, _| {}).unwrap();
    second.engine.wait_idle().await;

    assert_eq!(remote_doc(&remote, &key), Some(doc(7)));
    assert!(!second.engine.known_record(&key).unwrap().pending_save);
}

#[tokio::test]
async fn restart_resubmits_pending_deletes_immediately() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(InMemoryStore::new());
    let key = RecordKey::new("gone", StorageRoot::Documents);
    remote.seed(&key, cbor_encode(&doc(1)).unwrap(), false, "Doc");

    let first = Node::with_local(&remote, local.clone());
    first.engine.set_reachability(Reachability::Unreachable);
    first.engine.delete(&doc(1), &key).unwrap();
    first.engine.wait_idle().await;
    first.engine.shutdown().await.unwrap();
    drop(first);

    let second = Node::with_local(&remote, local);
    second.engine.wait_idle().await;
    let record = remote.record(&key).unwrap();
    assert!(record.deleted);
    let carried: Doc = cbor_decode(record.payload.inline().unwrap()).unwrap();
    assert_eq!(carried, doc(1));
}

mod drafts {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Doc {
        pub v: i64,
    }

    impl recordsync_protocol::Syncable for Doc {}
}

mod archive {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Doc {
        pub v: i64,
        pub shelf: String,
    }

    impl recordsync_protocol::Syncable for Doc {}
}

#[tokio::test]
async fn same_named_types_recover_separately() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(InMemoryStore::new());
    let key = RecordKey::new("archived", StorageRoot::Documents);
    let stored = archive::Doc {
        v: 7,
        shelf: "top".into(),
    };

    let first = Node::with_local(&remote, local.clone());
    first.engine.set_reachability(Reachability::Unreachable);
    first
        .engine
        .save(&stored, &key, Arc::new(NeverOverwrite), |_| {})
        .unwrap();
    first.engine.wait_idle().await;
    first.engine.shutdown().await.unwrap();
    drop(first);

    let second = Node::with_local(&remote, local);
    let unrelated = second.key("draft");
    second
        .engine
        .load(&unrelated, Arc::new(NeverOverwrite), |_: Option<drafts::Doc>, _| {})
        .unwrap();
    second.engine.wait_idle().await;
    assert!(second.engine.known_record(&key).unwrap().pending_save);
    assert_eq!(remote.writes(), 0);

    let other = second.key("other");
    second
        .engine
        .load(&other, Arc::new(NeverOverwrite), |_: Option<archive::Doc>, _| {})
        .unwrap();
    second.engine.wait_idle().await;

    let record = remote.record(&key).unwrap();
    assert_eq!(record.type_tag, <archive::Doc as Syncable>::type_tag());
    let pushed: archive::Doc = cbor_decode(record.payload.inline().unwrap()).unwrap();
    assert_eq!(pushed, stored);
    assert!(!second.engine.known_record(&key).unwrap().pending_save);
}

#[tokio::test]
async fn panicking_callback_leaves_later_callbacks_running() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);

    node.engine
        .save(&doc(1), &node.key("a"), ordered(), |_| panic!("caller bug"))
        .unwrap();
    node.engine.wait_idle().await;

    let finals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&finals);
    node.engine
        .save(&doc(2), &node.key("b"), ordered(), move |v| sink.lock().push(v))
        .unwrap();
    let (seen, on_loaded) = recorder();
    node.engine.load(&node.key("a"), ordered(), on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(*finals.lock(), vec![doc(2)]);
    assert_eq!(*seen.lock(), vec![(Some(doc(1)), false)]);
}

fn union(a: &str, b: &str) -> String {
    a.chars().chain(b.chars()).collect::<BTreeSet<_>>().into_iter().collect()
}

#[tokio::test]
async fn merged_load_rewrites_local_and_pushes() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");
    let merging: Arc<dyn SyncPolicy<Doc>> = Arc::new(FnPolicy::<Doc>::new().with_merge(|r, l| {
        Some(doc_with(r.v.max(l.v), &union(&r.body, &l.body)))
    }));

    node.put_local(&key, &doc_with(2, "bc"));
    remote.seed(&key, cbor_encode(&doc_with(3, "ab")).unwrap(), false, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, merging, on_loaded).unwrap();
    node.engine.wait_idle().await;

    let merged = doc_with(3, "abc");
    assert_eq!(node.local_doc(&key), Some(merged.clone()));
    assert_eq!(remote_doc(&remote, &key), Some(merged.clone()));
    assert_eq!(remote.writes(), 1);
    assert_eq!(
        *seen.lock(),
        vec![(Some(doc_with(2, "bc")), false), (Some(merged), true)]
    );
    assert!(!node.engine.known_record(&key).unwrap().pending_save);
}

#[tokio::test]
async fn remote_win_replaces_local_copy() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    node.put_local(&key, &doc(2));
    remote.seed(&key, cbor_encode(&doc(5)).unwrap(), false, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, ordered(), on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(node.local_doc(&key), Some(doc(5)));
    assert_eq!(remote.writes(), 0);
    assert_eq!(*seen.lock(), vec![(Some(doc(2)), false), (Some(doc(5)), true)]);
}

#[tokio::test]
async fn merge_into_remote_changes_nothing() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");
    let remote_wins: Arc<dyn SyncPolicy<Doc>> = Arc::new(
        FnPolicy::<Doc>::new()
            .with_merge(|r, _| Some(r.clone()))
            .with_overwrite(|_, _| true),
    );

    node.put_local(&key, &doc(2));
    remote.seed(&key, cbor_encode(&doc(5)).unwrap(), false, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, remote_wins, on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(remote.writes(), 0);
    assert_eq!(node.local_doc(&key), Some(doc(2)));
    assert_eq!(remote_doc(&remote, &key), Some(doc(5)));
    assert_eq!(*seen.lock(), vec![(Some(doc(2)), false)]);
}

#[tokio::test]
async fn local_win_delivers_push_result() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    node.put_local(&key, &doc(7));
    remote.seed(&key, cbor_encode(&doc(5)).unwrap(), false, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, ordered(), on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(remote_doc(&remote, &key), Some(doc(7)));
    assert_eq!(remote.writes(), 1);
    assert_eq!(*seen.lock(), vec![(Some(doc(7)), false), (Some(doc(7)), true)]);
}

/// Decides overwrites only after a pause, as a prompt to the user would.
struct AskUser;

impl SyncPolicy<Doc> for AskUser {
    fn should_overwrite(&self, _: &Doc, _: &Doc) -> bool {
        false
    }

    fn interactive_should_overwrite<'a>(&'a self, candidate: &'a Doc, existing: &'a Doc) -> Decision<'a, bool> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            candidate.v > existing.v
        })
    }
}

#[tokio::test]
async fn interactive_decision_drives_load() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");

    node.put_local(&key, &doc(7));
    remote.seed(&key, cbor_encode(&doc(5)).unwrap(), false, "Doc");

    let (seen, on_loaded) = recorder();
    node.engine.load(&key, Arc::new(AskUser), on_loaded).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(remote_doc(&remote, &key), Some(doc(7)));
    assert_eq!(*seen.lock(), vec![(Some(doc(7)), false), (Some(doc(7)), true)]);
}

#[tokio::test]
async fn observe_reports_existing_differences() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let known = node.key("saves/1");
    let fresh = node.key("saves/2");

    node.engine.save(&doc(1), &known, ordered(), |_| {}).unwrap();
    node.engine.wait_idle().await;
    remote.seed(&fresh, cbor_encode(&doc(3)).unwrap(), false, "Doc");

    let changes: Arc<Mutex<Vec<Vec<ChangedItem>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    let folder = node.key("saves/");
    node.engine
        .observe(&folder, Liveness::Always, move |items| sink.lock().push(items))
        .unwrap();
    node.engine.wait_idle().await;

    let changes = changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].len(), 1);
    assert_eq!(changes[0][0].key, fresh);
    assert_eq!(changes[0][0].path, "saves/2");
    assert_eq!(remote.subscriptions(), vec![folder]);
}

#[tokio::test]
async fn notification_rescans_matching_observer() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("saves/1");

    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&values);
    node.engine
        .observe_typed(&key, Liveness::Always, ordered(), move |item| {
            sink.lock().push(item.value)
        })
        .unwrap();
    node.engine.wait_idle().await;
    assert!(values.lock().is_empty());

    remote.seed(&key, cbor_encode(&doc(9)).unwrap(), false, "Doc");
    let payload = format!(r#"{{"namespace":"test","key":"{}"}}"#, key.id());
    assert_eq!(node.engine.received_remote_notification(payload.as_bytes()), 1);
    node.engine.wait_idle().await;

    assert_eq!(*values.lock(), vec![Some(doc(9))]);
    assert_eq!(node.local_doc(&key), Some(doc(9)));

    // Other namespaces are ignored.
    let foreign = br#"{"namespace":"elsewhere"}"#;
    assert_eq!(node.engine.received_remote_notification(foreign), 0);
}

#[tokio::test]
async fn dead_owner_stops_observing() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let key = node.key("a");
    let owner = Arc::new(());

    let calls = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&calls);
    node.engine
        .observe(&key, Liveness::owned_by(&owner), move |_| *sink.lock() += 1)
        .unwrap();
    node.engine.wait_idle().await;

    drop(owner);
    remote.seed(&key, cbor_encode(&doc(1)).unwrap(), false, "Doc");
    assert_eq!(node.engine.received_remote_notification(b"not json"), 0);
    node.engine.wait_idle().await;
    assert_eq!(*calls.lock(), 0);
}

#[tokio::test]
async fn fatal_error_disables_remote() {
    let remote = Arc::new(MemoryRemoteStore::new());
    let node = Node::start(&remote);
    let policy: Arc<dyn SyncPolicy<Doc>> = Arc::new(NeverOverwrite);

    remote.fail_next_write(RemoteError::Fatal(FatalKind::QuotaExceeded));
    node.engine.save(&doc(1), &node.key("a"), policy.clone(), |_| {}).unwrap();
    node.engine.wait_idle().await;
    assert!(node.engine.is_remote_disabled());

    let attempts = remote.write_attempts();
    let trips = remote.fetch_round_trips();
    let key = node.key("b");
    node.engine.save(&doc(2), &key, policy, |_| {}).unwrap();
    node.engine.wait_idle().await;

    assert_eq!(node.local_doc(&key), Some(doc(2)));
    assert_eq!(remote.write_attempts(), attempts);
    assert_eq!(remote.fetch_round_trips(), trips);
}

#[tokio::test]
async fn concurrent_loads_share_one_fetch() {
    let remote = Arc::new(MemoryRemoteStore::new());
    for i in 0..5 {
        let key = RecordKey::new(&format!("k{i}"), StorageRoot::Documents);
        remote.seed(&key, cbor_encode(&doc(i)).unwrap(), false, "Doc");
    }
    let node = Node::start(&remote);

    let (seen, on_loaded) = recorder();
    let on_loaded = Arc::new(on_loaded);
    for i in 0..5 {
        let on_loaded = Arc::clone(&on_loaded);
        node.engine
            .load(&node.key(&format!("k{i}")), ordered(), move |v, r| on_loaded(v, r))
            .unwrap();
    }
    node.engine.wait_idle().await;

    assert_eq!(remote.fetch_round_trips(), 1);
    assert_eq!(seen.lock().len(), 5);
    assert_eq!(node.engine.stats().fetched_records, 5);
}

#[tokio::test]
async fn file_store_round_trip() {
    let data = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let local = Arc::new(recordsync_storage::FileStore::open(data.path(), true).unwrap());
    let config = SyncConfig::new("test")
        .with_data_dir(data.path())
        .with_fetch_debounce(Duration::from_millis(5))
        .with_blob_dir(data.path().join("blobs"));
    let engine = SyncEngine::init(config, local, remote.clone()).unwrap();

    let absolute = data.path().join("documents").join("notes").join("1");
    let key = engine.key(absolute.to_str().unwrap(), StorageRoot::Documents);
    assert_eq!(key.path(), "notes/1");

    engine.save_compressed(&doc(4), &key, ordered(), |_| {}).unwrap();
    engine.wait_idle().await;
    assert!(data.path().join("documents/notes/1.zst").exists());

    let (seen, on_loaded) = recorder();
    engine.load_compressed(&key, ordered(), on_loaded).unwrap();
    engine.wait_idle().await;
    assert_eq!(*seen.lock(), vec![(Some(doc(4)), false)]);

    engine.shutdown().await.unwrap();
    assert!(data.path().join(recordsync_engine::DEFAULT_LEDGER_PATH).exists());
}
