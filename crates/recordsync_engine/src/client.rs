//! Remote store client.
//!
//! Wraps a [`RemoteStore`] with everything the engine needs on top of raw
//! round trips:
//!
//! - a one-time namespace ready gate that every request waits behind
//! - a single network lane, so at most one remote call is in flight
//! - debounced fetch batching with per-key reply distribution
//! - per-key push queues (one push per key at a time, in arrival order)
//! - error classification: retry, back off, spill, defer or disable
//!
//! The ledger and the push-queue map are only locked for short, synchronous
//! sections and never across a round trip.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{RemoteFailure, SyncError, SyncResult};
use crate::ledger::LocalKnownRecords;
use crate::reconcile::{plan_push, PushPlan, RemoteState};
use crate::scheduler::RetryScheduler;
use crate::stats::SyncStats;
use crate::transport::RemoteStore;
use crate::worker::{Activity, ActivityGuard, WorkerPool};
use parking_lot::{Mutex, RwLock};
use recordsync_protocol::{
    BlobRef, ErrorClass, FatalKind, Payload, RecordDraft, RecordKey, RecordVersion, RemoteError,
    RemoteResult, RemoteSnapshot, SyncPolicy, Syncable, VersionToken,
};
use recordsync_storage::{Compressor, StorageError};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OnceCell};
use tracing::{debug, error, info, warn};

/// A queued push, already bound to its key and value.
pub(crate) type PushJob = Pin<Box<dyn Future<Output = ()> + Send>>;

type FetchReply = oneshot::Sender<Result<Option<RemoteSnapshot>, RemoteFailure>>;

#[derive(Default)]
struct FetchQueue {
    pending: Vec<(RecordKey, FetchReply)>,
    scheduled: bool,
}

/// Result of a save push.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PushOutcome<T> {
    /// The value (possibly merged) was written.
    Stored { value: T, version: VersionToken },
    /// The remote copy won and was left untouched.
    RemoteKept { value: T, version: VersionToken },
    /// The remote record already held the value.
    AlreadyCurrent { value: T },
}

impl<T> PushOutcome<T> {
    /// The value both sides converge on.
    pub(crate) fn into_value(self) -> T {
        match self {
            PushOutcome::Stored { value, .. }
            | PushOutcome::RemoteKept { value, .. }
            | PushOutcome::AlreadyCurrent { value } => value,
        }
    }
}

/// Result of a tombstone push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeleteOutcome {
    Written(VersionToken),
    AlreadyDeleted,
}

enum WriteFailure {
    Conflict,
    Abandoned(SyncError),
}

/// Temporary blob file, removed when dropped.
struct BlobSpill {
    path: PathBuf,
}

impl Drop for BlobSpill {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove blob spill");
            }
        }
    }
}

pub(crate) struct RemoteStoreClient {
    store: Arc<dyn RemoteStore>,
    namespace: String,
    retry: RetryConfig,
    fetch_debounce: Duration,
    fetch_batch_size: usize,
    blob_dir: PathBuf,
    compress_remote: bool,
    compressor: Compressor,
    scheduler: Arc<RetryScheduler>,
    ledger: Arc<LocalKnownRecords>,
    workers: WorkerPool,
    activity: Activity,
    runtime: tokio::runtime::Handle,
    disabled: AtomicBool,
    ready: OnceCell<()>,
    lane: tokio::sync::Mutex<()>,
    fetches: Mutex<FetchQueue>,
    pushes: Mutex<HashMap<RecordKey, VecDeque<(PushJob, ActivityGuard)>>>,
    stats: RwLock<SyncStats>,
}

impl RemoteStoreClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn RemoteStore>,
        config: &SyncConfig,
        scheduler: Arc<RetryScheduler>,
        ledger: Arc<LocalKnownRecords>,
        workers: WorkerPool,
        activity: Activity,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            store,
            namespace: config.namespace.clone(),
            retry: config.retry.clone(),
            fetch_debounce: config.fetch_debounce,
            fetch_batch_size: config.fetch_batch_size.max(1),
            blob_dir: config.blob_dir.clone(),
            compress_remote: config.compress_remote,
            compressor: Compressor::new(config.compression_level),
            scheduler,
            ledger,
            workers,
            activity,
            runtime,
            disabled: AtomicBool::new(false),
            ready: OnceCell::new(),
            lane: tokio::sync::Mutex::new(()),
            fetches: Mutex::new(FetchQueue::default()),
            pushes: Mutex::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn check_available(&self) -> Result<(), RemoteFailure> {
        if self.is_disabled() {
            return Err(RemoteFailure::Disabled);
        }
        if !self.scheduler.is_reachable() {
            return Err(RemoteFailure::Offline);
        }
        Ok(())
    }

    fn disable(&self, kind: FatalKind) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            error!(error = %kind, "remote integration disabled for this process");
        }
        self.stats.write().last_error = Some(kind.to_string());
    }

    /// Maps a non-retried error to the failure handed back to callers.
    fn give_up(&self, operation: &'static str, error: RemoteError) -> RemoteFailure {
        match error.class() {
            ErrorClass::Offline => {
                info!(operation, error = %error, "remote store unreachable");
                self.scheduler.mark_unreachable();
                RemoteFailure::Offline
            }
            ErrorClass::Fatal(kind) => {
                self.disable(kind);
                RemoteFailure::Disabled
            }
            _ => {
                error!(operation, error = %error, "unclassified remote failure, abandoning");
                let mut stats = self.stats.write();
                stats.unclassified_failures += 1;
                stats.last_error = Some(error.to_string());
                RemoteFailure::Failed(error)
            }
        }
    }

    async fn back_off(&self, operation: &'static str, delay: Option<Duration>, attempt: u32) {
        let wait = match delay {
            Some(d) => {
                self.stats.write().rate_limit_waits += 1;
                d
            }
            None => self.retry.delay_for_attempt(attempt),
        };
        warn!(operation, attempt, wait = ?wait, "transient remote failure, retrying");
        tokio::time::sleep(wait).await;
    }

    async fn ensure_ready(&self) -> Result<(), RemoteFailure> {
        self.check_available()?;
        self.ready.get_or_try_init(|| self.open_namespace()).await?;
        Ok(())
    }

    async fn open_namespace(&self) -> Result<(), RemoteFailure> {
        let mut attempt = 0;
        loop {
            self.check_available()?;
            let result = {
                let _lane = self.lane.lock().await;
                self.store.ensure_namespace_ready(&self.namespace).await
            };
            match result {
                Ok(()) => {
                    info!(namespace = %self.namespace, "remote namespace ready");
                    return Ok(());
                }
                Err(error) => match error.class() {
                    ErrorClass::RetryAfter(delay) => {
                        attempt += 1;
                        self.back_off("ensure_namespace_ready", delay, attempt).await;
                    }
                    _ => return Err(self.give_up("ensure_namespace_ready", error)),
                },
            }
        }
    }

    /// Runs a read-only request on the network lane, retrying transient failures.
    async fn call<R, F, Fut>(&self, operation: &'static str, mut request: F) -> Result<R, RemoteFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<R>>,
    {
        let mut attempt = 0;
        loop {
            self.ensure_ready().await?;
            let result = {
                let _lane = self.lane.lock().await;
                request().await
            };
            match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, retries = attempt, "remote call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => match error.class() {
                    ErrorClass::RetryAfter(delay) => {
                        attempt += 1;
                        self.back_off(operation, delay, attempt).await;
                    }
                    _ => return Err(self.give_up(operation, error)),
                },
            }
        }
    }

    // Fetching

    /// Fetches one record through the batcher.
    pub(crate) async fn fetch(
        self: &Arc<Self>,
        key: &RecordKey,
    ) -> Result<Option<RemoteSnapshot>, RemoteFailure> {
        self.check_available()?;
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut queue = self.fetches.lock();
            queue.pending.push((key.clone(), tx));
            !std::mem::replace(&mut queue.scheduled, true)
        };
        if start {
            let client = Arc::clone(self);
            self.runtime.spawn(async move { client.drain_fetches().await });
        }
        rx.await.map_err(|_| RemoteFailure::ShutDown)?
    }

    async fn drain_fetches(&self) {
        tokio::time::sleep(self.fetch_debounce).await;
        loop {
            let batch: Vec<(RecordKey, FetchReply)> = {
                let mut queue = self.fetches.lock();
                if queue.pending.is_empty() {
                    queue.scheduled = false;
                    return;
                }
                let take = queue.pending.len().min(self.fetch_batch_size);
                queue.pending.drain(..take).collect()
            };

            let mut keys: Vec<RecordKey> = batch.iter().map(|(k, _)| k.clone()).collect();
            keys.sort();
            keys.dedup();
            debug!(keys = keys.len(), requests = batch.len(), "fetching batch");

            let result = self
                .call("fetch_batch", || {
                    self.stats.write().fetch_round_trips += 1;
                    self.store.fetch_batch(&keys)
                })
                .await;

            match result {
                Ok(found) => {
                    self.stats.write().fetched_records += found.len() as u64;
                    for (key, reply) in batch {
                        let _ = reply.send(Ok(found.get(&key).cloned()));
                    }
                }
                Err(failure) => {
                    for (_, reply) in batch {
                        let _ = reply.send(Err(failure.clone()));
                    }
                }
            }
        }
    }

    /// Lists remote records matched by `pattern`.
    pub(crate) async fn query(
        &self,
        pattern: &RecordKey,
        type_tag: Option<&str>,
    ) -> Result<Vec<RecordVersion>, RemoteFailure> {
        self.call("query", || self.store.query(pattern, type_tag)).await
    }

    /// Subscribes to change notifications for `pattern`.
    pub(crate) async fn subscribe(&self, pattern: &RecordKey) -> Result<(), RemoteFailure> {
        self.call("subscribe", || self.store.subscribe(pattern)).await
    }

    // Payload encoding

    /// Encodes a value for the remote store, compressed if configured.
    pub(crate) async fn encode_remote<T: Syncable>(&self, value: &T) -> SyncResult<Vec<u8>> {
        let value = value.clone();
        let compressor = self.compressor;
        let compress = self.compress_remote;
        self.workers
            .run(move || -> SyncResult<Vec<u8>> {
                let bytes = value.encode()?;
                if compress {
                    Ok(compressor.compress(&bytes)?)
                } else {
                    Ok(bytes)
                }
            })
            .await?
    }

    /// Compresses raw remote bytes if configured.
    async fn pack(&self, bytes: Vec<u8>) -> SyncResult<Vec<u8>> {
        if !self.compress_remote {
            return Ok(bytes);
        }
        let compressor = self.compressor;
        self.workers
            .run(move || compressor.compress(&bytes))
            .await?
            .map_err(SyncError::from)
    }

    /// Decodes a fetched payload. Undecodable payloads yield `None`.
    pub(crate) async fn decode_remote<T: Syncable>(&self, snapshot: &RemoteSnapshot) -> Option<T> {
        let payload = snapshot.payload.clone();
        let compressor = self.compressor;
        let result = self
            .workers
            .run(move || -> SyncResult<T> {
                let raw = match payload {
                    Payload::Inline(bytes) => bytes,
                    Payload::Blob(blob) => std::fs::read(&blob.path).map_err(StorageError::from)?,
                };
                let bytes = if Compressor::is_compressed(&raw) {
                    match compressor.decompress(&raw) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            debug!(error = %e, "remote payload failed to decompress, decoding raw");
                            raw
                        }
                    }
                } else {
                    raw
                };
                Ok(T::decode(&bytes)?)
            })
            .await;

        match result {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) | Err(e) => {
                warn!(key = %snapshot.key, error = %e, "remote payload undecodable, treating as absent");
                None
            }
        }
    }

    // Writing

    async fn spill(&self, key: &RecordKey, bytes: Vec<u8>) -> SyncResult<BlobSpill> {
        let dir = self.blob_dir.clone();
        let spill = BlobSpill {
            path: dir.join(format!("{}.blob", uuid::Uuid::new_v4())),
        };
        let target = spill.path.clone();
        let size = bytes.len();
        self.workers
            .run(move || -> std::io::Result<()> {
                std::fs::create_dir_all(&dir)?;
                std::fs::write(&target, &bytes)
            })
            .await?
            .map_err(StorageError::from)?;
        self.stats.write().blob_spills += 1;
        info!(key = %key, size, "payload spilled to blob");
        Ok(spill)
    }

    /// Submits one write, retrying everything except a stale token.
    async fn write_with_retries(
        &self,
        key: &RecordKey,
        bytes: Vec<u8>,
        deleted: bool,
        type_tag: &str,
        expected: &VersionToken,
    ) -> Result<VersionToken, WriteFailure> {
        let mut draft = RecordDraft::new(key.clone(), bytes, deleted, type_tag);
        let mut spill: Option<BlobSpill> = None;
        let mut attempt = 0;

        loop {
            self.ensure_ready()
                .await
                .map_err(|f| WriteFailure::Abandoned(f.into()))?;
            let result = {
                let _lane = self.lane.lock().await;
                self.store.write(&draft, expected).await
            };
            let error = match result {
                Ok(version) => return Ok(version),
                Err(error) => error,
            };

            match error.class() {
                ErrorClass::Conflict => return Err(WriteFailure::Conflict),
                ErrorClass::RetryAfter(delay) => {
                    attempt += 1;
                    self.back_off("write", delay, attempt).await;
                }
                ErrorClass::TooLarge if spill.is_none() => {
                    let inline = draft.payload.inline().map(<[u8]>::to_vec).unwrap_or_default();
                    let blob = self.spill(key, inline).await.map_err(WriteFailure::Abandoned)?;
                    draft.payload = Payload::Blob(BlobRef::new(&blob.path));
                    spill = Some(blob);
                }
                _ => return Err(WriteFailure::Abandoned(self.give_up("write", error).into())),
            }
        }
    }

    /// Settles the ledger after a confirmed write.
    ///
    /// If another push for the key is queued the entry stays pending.
    fn settle(&self, key: &RecordKey, version: &VersionToken, deleted: bool) {
        if self.has_queued_push(key) {
            self.ledger.set_version(key, version);
        } else {
            self.ledger.confirm(key, version, deleted);
        }
    }

    /// Pushes `value`, reconciling against the current remote copy first.
    ///
    /// Restarts from the fetch whenever the version token turns out stale.
    pub(crate) async fn push_value<T: Syncable>(
        self: &Arc<Self>,
        key: &RecordKey,
        value: T,
        policy: &dyn SyncPolicy<T>,
    ) -> SyncResult<PushOutcome<T>> {
        loop {
            let snapshot = self.fetch(key).await?;
            let expected = snapshot
                .as_ref()
                .map_or_else(VersionToken::unknown, |s| s.version.clone());
            let tombstone = snapshot.as_ref().map_or(false, |s| s.deleted);
            let decoded = match &snapshot {
                Some(s) if !s.deleted => self.decode_remote::<T>(s).await,
                _ => None,
            };
            let state = if tombstone {
                RemoteState::Tombstone(None)
            } else {
                decoded.as_ref().map_or(RemoteState::Absent, RemoteState::Live)
            };

            let submit = match plan_push(&value, state, policy).await {
                PushPlan::AlreadyCurrent => {
                    debug!(key = %key, version = %expected, "remote already current");
                    self.settle(key, &expected, false);
                    return Ok(PushOutcome::AlreadyCurrent { value });
                }
                PushPlan::KeepRemote(remote) => {
                    info!(key = %key, version = %expected, "remote copy kept");
                    self.settle(key, &expected, false);
                    return Ok(PushOutcome::RemoteKept {
                        value: remote,
                        version: expected,
                    });
                }
                PushPlan::Submit(submit) => submit,
            };

            let bytes = self.encode_remote(&submit).await?;
            match self
                .write_with_retries(key, bytes, false, T::type_tag(), &expected)
                .await
            {
                Ok(version) => {
                    self.stats.write().pushes += 1;
                    info!(key = %key, version = %version, "push confirmed");
                    self.settle(key, &version, false);
                    return Ok(PushOutcome::Stored {
                        value: submit,
                        version,
                    });
                }
                Err(WriteFailure::Conflict) => {
                    self.stats.write().conflicts_retried += 1;
                    debug!(key = %key, "stale version token, refetching");
                }
                Err(WriteFailure::Abandoned(e)) => return Err(e),
            }
        }
    }

    /// Pushes a tombstone carrying `payload`.
    ///
    /// A record that is already a tombstone is left alone.
    pub(crate) async fn push_tombstone(
        self: &Arc<Self>,
        key: &RecordKey,
        payload: Vec<u8>,
        type_tag: &str,
    ) -> SyncResult<DeleteOutcome> {
        let bytes = self.pack(payload).await?;
        loop {
            let expected = match self.fetch(key).await? {
                Some(snapshot) if snapshot.deleted => {
                    debug!(key = %key, "remote already deleted");
                    self.settle(key, &snapshot.version, true);
                    return Ok(DeleteOutcome::AlreadyDeleted);
                }
                Some(snapshot) => snapshot.version,
                None => VersionToken::unknown(),
            };

            match self
                .write_with_retries(key, bytes.clone(), true, type_tag, &expected)
                .await
            {
                Ok(version) => {
                    self.stats.write().pushes += 1;
                    info!(key = %key, version = %version, "tombstone confirmed");
                    self.settle(key, &version, true);
                    return Ok(DeleteOutcome::Written(version));
                }
                Err(WriteFailure::Conflict) => {
                    self.stats.write().conflicts_retried += 1;
                    debug!(key = %key, "stale version token, refetching");
                }
                Err(WriteFailure::Abandoned(e)) => return Err(e),
            }
        }
    }

    // Per-key push queues

    /// Queues `job` behind any push already running or queued for `key`.
    pub(crate) fn enqueue_push(self: &Arc<Self>, key: &RecordKey, job: PushJob) {
        let guard = self.activity.enter();
        let start = {
            let mut queues = self.pushes.lock();
            match queues.get_mut(key) {
                Some(queue) => {
                    queue.push_back((job, guard));
                    false
                }
                None => {
                    queues.insert(key.clone(), VecDeque::from([(job, guard)]));
                    true
                }
            }
        };
        if start {
            let client = Arc::clone(self);
            let key = key.clone();
            self.runtime.spawn(async move { client.drain_pushes(key).await });
        } else {
            debug!(key = %key, "push queued behind running push");
        }
    }

    async fn drain_pushes(&self, key: RecordKey) {
        loop {
            let next = {
                let mut queues = self.pushes.lock();
                let next = queues.get_mut(&key).and_then(VecDeque::pop_front);
                if next.is_none() {
                    queues.remove(&key);
                }
                next
            };
            match next {
                Some((job, _guard)) => job.await,
                None => return,
            }
        }
    }

    /// Returns true if a push for `key` is running or queued.
    pub(crate) fn push_in_flight(&self, key: &RecordKey) -> bool {
        self.pushes.lock().contains_key(key)
    }

    /// Returns true if a push for `key` is waiting behind the running one.
    pub(crate) fn has_queued_push(&self, key: &RecordKey) -> bool {
        self.pushes
            .lock()
            .get(key)
            .map_or(false, |queue| !queue.is_empty())
    }
}

impl std::fmt::Debug for RemoteStoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStoreClient")
            .field("namespace", &self.namespace)
            .field("disabled", &self.is_disabled())
            .field("push_queues", &self.pushes.lock().len())
            .finish()
    }
}
