//! The sync engine context object.
//!
//! [`SyncEngine`] is a cheap, cloneable handle. It is created once with
//! [`SyncEngine::init`] and torn down with [`SyncEngine::shutdown`]; every
//! component (ledger, scheduler, remote client, observers, callback context)
//! hangs off it, and there is no global state.
//!
//! Local reads and writes are never blocked by the remote store. Remote work
//! runs in background tasks and reports back through callbacks, which are
//! always invoked one at a time on the engine's callback context.

use crate::callback::CallbackQueue;
use crate::client::RemoteStoreClient;
use crate::config::SyncConfig;
use crate::error::{RemoteFailure, SyncError, SyncResult};
use crate::ledger::{KnownRecord, LocalKnownRecords};
use crate::observer::{ChangeHandler, ChangeItem, ChangedItem, Liveness, ObserverHub, ObserverId, Registration};
use crate::paths::{local_path, logical_path};
use crate::reconcile::{plan_load, LoadAction, RemoteState};
use crate::scheduler::{Reachability, RetryScheduler};
use crate::stats::SyncStats;
use crate::transport::RemoteStore;
use crate::worker::{Activity, WorkerPool};
use parking_lot::Mutex;
use recordsync_protocol::{RecordKey, RemoteNotification, StorageRoot, SyncPolicy, Syncable};
use recordsync_storage::{Compressor, LocalStore};
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type LoadCallback<T> = Arc<dyn Fn(Option<T>, bool) + Send + Sync>;
type FinalCallback<T> = Box<dyn FnOnce(T) + Send>;
type Recovery = Arc<dyn Fn(&SyncEngine) + Send + Sync>;

struct RegisteredType {
    id: TypeId,
    name: &'static str,
    tag: &'static str,
    recovery: Recovery,
}

struct EngineInner {
    config: SyncConfig,
    local: Arc<dyn LocalStore>,
    ledger: Arc<LocalKnownRecords>,
    scheduler: Arc<RetryScheduler>,
    client: Arc<RemoteStoreClient>,
    observers: ObserverHub,
    callbacks: CallbackQueue,
    workers: WorkerPool,
    compressor: Compressor,
    activity: Activity,
    runtime: tokio::runtime::Handle,
    types: Mutex<Vec<RegisteredType>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.callbacks.close();
    }
}

/// Keeps typed local files in sync with a remote record store.
///
/// # Example
///
/// ```rust,no_run
/// use recordsync_engine::{MemoryRemoteStore, SyncConfig, SyncEngine};
/// use recordsync_protocol::{Ordered, StorageRoot, Syncable};
/// use recordsync_storage::InMemoryStore;
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
/// struct Score { points: u32 }
///
/// impl Syncable for Score {}
///
/// # async fn run() -> recordsync_engine::SyncResult<()> {
/// let engine = SyncEngine::init(
///     SyncConfig::new("game"),
///     Arc::new(InMemoryStore::new()),
///     Arc::new(MemoryRemoteStore::new()),
/// )?;
/// let key = engine.key("scores/best", StorageRoot::ApplicationSupport);
/// engine.save(&Score { points: 10 }, &key, Arc::new(Ordered), |_final| {})?;
/// engine.wait_idle().await;
/// engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Starts an engine on the current tokio runtime.
    ///
    /// Loads the ledger, starts the ledger flush task and the callback
    /// context, and resubmits deletes left pending by a previous run. Pending
    /// saves are resubmitted when their value type is first used.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or if the ledger cannot be read.
    pub fn init(
        config: SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> SyncResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Worker(format!("no tokio runtime: {e}")))?;
        let ledger = Arc::new(LocalKnownRecords::load(Arc::clone(&local), &config.ledger_path)?);
        let scheduler = Arc::new(RetryScheduler::default());
        let workers = WorkerPool::new(config.worker_threads);
        let activity = Activity::default();
        let client = Arc::new(RemoteStoreClient::new(
            remote,
            &config,
            Arc::clone(&scheduler),
            Arc::clone(&ledger),
            workers.clone(),
            activity.clone(),
            runtime.clone(),
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let flush_task = ledger.spawn_flush_task(&runtime, config.ledger_flush_interval, shutdown_rx);
        let (callbacks, callback_task) = CallbackQueue::spawn(&runtime, activity.clone());

        info!(
            namespace = %config.namespace,
            records = ledger.len(),
            workers = workers.size(),
            "sync engine started"
        );

        let engine = Self {
            inner: Arc::new(EngineInner {
                compressor: Compressor::new(config.compression_level),
                config,
                local,
                ledger,
                scheduler,
                client,
                observers: ObserverHub::new(),
                callbacks,
                workers,
                activity,
                runtime,
                types: Mutex::new(Vec::new()),
                shutdown,
                tasks: Mutex::new(vec![flush_task, callback_task]),
                closed: AtomicBool::new(false),
            }),
        };

        engine.recover_deletes();
        let weak = engine.downgrade();
        engine.inner.scheduler.add_permanent(move || {
            if let Some(engine) = SyncEngine::upgrade(&weak) {
                engine.recover_deletes();
                engine.spawn_scans(engine.inner.observers.all(), true);
            }
        });

        Ok(engine)
    }

    fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<EngineInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn check_open(&self) -> SyncResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(SyncError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Derives the record key for `path` under `root`.
    ///
    /// Absolute paths inside the configured data directory are reduced to
    /// their logical form first.
    pub fn key(&self, path: &str, root: StorageRoot) -> RecordKey {
        let logical = logical_path(path, root, self.inner.config.data_dir.as_deref());
        RecordKey::new(&logical, root)
    }

    // Save

    /// Writes `value` locally and pushes it in the background.
    ///
    /// Returns the bytes written to the local file. `on_final` receives the
    /// value both sides converged on once the push completes; it is not
    /// called if the push is deferred (offline) or abandoned.
    ///
    /// # Errors
    ///
    /// Fails if the key is a folder pattern, the value cannot be encoded,
    /// another type already uses `T`'s type tag, or the local write fails.
    /// Remote failures are never reported here.
    pub fn save<T: Syncable>(
        &self,
        value: &T,
        key: &RecordKey,
        policy: Arc<dyn SyncPolicy<T>>,
        on_final: impl FnOnce(T) + Send + 'static,
    ) -> SyncResult<Vec<u8>> {
        self.save_as(value, key, false, policy, Box::new(on_final))
    }

    /// Like [`SyncEngine::save`], storing the local file compressed.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::save`].
    pub fn save_compressed<T: Syncable>(
        &self,
        value: &T,
        key: &RecordKey,
        policy: Arc<dyn SyncPolicy<T>>,
        on_final: impl FnOnce(T) + Send + 'static,
    ) -> SyncResult<Vec<u8>> {
        self.save_as(value, key, true, policy, Box::new(on_final))
    }

    fn save_as<T: Syncable>(
        &self,
        value: &T,
        key: &RecordKey,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
        on_final: FinalCallback<T>,
    ) -> SyncResult<Vec<u8>> {
        self.check_open()?;
        check_record_key(key)?;
        self.register_type(&policy)?;

        let stored = encode_for_disk(value, compressed, self.inner.compressor)?;
        if let Some(previous) = self.inner.ledger.get(key) {
            if previous.compressed != compressed {
                self.inner.local.delete(&local_path(key, previous.compressed))?;
            }
        }
        self.inner.local.write_atomic(&local_path(key, compressed), &stored)?;
        self.inner.ledger.mark_pending(key, T::type_tag(), compressed);
        debug!(key = %key, bytes = stored.len(), compressed, "saved locally");

        self.enqueue_save_push(key.clone(), value.clone(), compressed, policy, Some(on_final));
        Ok(stored)
    }

    fn enqueue_save_push<T: Syncable>(
        &self,
        key: RecordKey,
        value: T,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
        on_final: Option<FinalCallback<T>>,
    ) {
        let engine = self.clone();
        let job_key = key.clone();
        self.inner.client.enqueue_push(
            &key,
            Box::pin(async move {
                engine
                    .run_save_push(job_key, value, compressed, policy, on_final)
                    .await;
            }),
        );
    }

    async fn run_save_push<T: Syncable>(
        &self,
        key: RecordKey,
        value: T,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
        on_final: Option<FinalCallback<T>>,
    ) {
        let final_value = match self
            .inner
            .client
            .push_value(&key, value.clone(), policy.as_ref())
            .await
        {
            Ok(outcome) => outcome.into_value(),
            Err(e) => {
                log_push_failure(&key, &e);
                return;
            }
        };

        if final_value != value {
            if self.inner.client.has_queued_push(&key) {
                debug!(key = %key, "newer save queued, leaving local copy alone");
            } else {
                self.write_local(&key, compressed, &final_value).await;
            }
        }
        if let Some(on_final) = on_final {
            self.inner.callbacks.post(move || on_final(final_value));
        }
    }

    // Load

    /// Loads the value stored at `key`.
    ///
    /// `on_loaded(value, from_remote)` is called with the local copy first,
    /// if there is one, and again whenever reconciliation with the remote
    /// copy changes what the caller should see. The last call is
    /// authoritative.
    ///
    /// # Errors
    ///
    /// Fails if the key is a folder pattern, another type already uses `T`'s
    /// type tag, or the engine is shut down.
    pub fn load<T: Syncable>(
        &self,
        key: &RecordKey,
        policy: Arc<dyn SyncPolicy<T>>,
        on_loaded: impl Fn(Option<T>, bool) + Send + Sync + 'static,
    ) -> SyncResult<()> {
        self.load_as(key, false, policy, Arc::new(on_loaded))
    }

    /// Like [`SyncEngine::load`], for values saved with [`SyncEngine::save_compressed`].
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::load`].
    pub fn load_compressed<T: Syncable>(
        &self,
        key: &RecordKey,
        policy: Arc<dyn SyncPolicy<T>>,
        on_loaded: impl Fn(Option<T>, bool) + Send + Sync + 'static,
    ) -> SyncResult<()> {
        self.load_as(key, true, policy, Arc::new(on_loaded))
    }

    fn load_as<T: Syncable>(
        &self,
        key: &RecordKey,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
        on_loaded: LoadCallback<T>,
    ) -> SyncResult<()> {
        self.check_open()?;
        check_record_key(key)?;
        self.register_type(&policy)?;
        self.spawn_load(key.clone(), compressed, policy, on_loaded, true);
        Ok(())
    }

    fn spawn_load<T: Syncable>(
        &self,
        key: RecordKey,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
        on_loaded: LoadCallback<T>,
        deliver_local: bool,
    ) {
        let guard = self.inner.activity.enter();
        let engine = self.clone();
        self.inner.runtime.spawn(async move {
            let _guard = guard;
            engine
                .run_load(key, compressed, policy, on_loaded, deliver_local)
                .await;
        });
    }

    async fn run_load<T: Syncable>(
        &self,
        key: RecordKey,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
        on_loaded: LoadCallback<T>,
        deliver_local: bool,
    ) {
        let tag = T::type_tag();
        let local = self.read_local::<T>(&key, compressed).await;
        if deliver_local {
            if let Some(value) = &local {
                self.deliver(&on_loaded, Some(value.clone()), false);
            }
        }
        self.inner.ledger.ensure(&key, tag, compressed);

        let snapshot = match self.inner.client.fetch(&key).await {
            Ok(snapshot) => snapshot,
            Err(RemoteFailure::Offline) => {
                debug!(key = %key, "load deferred until the network returns");
                let weak = self.downgrade();
                self.inner.scheduler.add_one_shot(move || {
                    if let Some(engine) = SyncEngine::upgrade(&weak) {
                        engine.spawn_load(key, compressed, policy, on_loaded, false);
                    }
                });
                return;
            }
            Err(failure) => {
                debug!(key = %key, error = %SyncError::from(failure), "remote phase of load skipped");
                return;
            }
        };

        let mut tombstone = false;
        let mut remote = None;
        if let Some(snapshot) = &snapshot {
            self.inner
                .ledger
                .record_fetched(&key, tag, compressed, &snapshot.version, snapshot.deleted);
            tombstone = snapshot.deleted;
            // A tombstone carries the deleted value unless it came from an older client.
            let empty = snapshot.payload.inline().map_or(false, <[u8]>::is_empty);
            if !(tombstone && empty) {
                remote = self.inner.client.decode_remote::<T>(snapshot).await;
            }
        }
        let state = if tombstone {
            RemoteState::Tombstone(remote.as_ref())
        } else {
            remote.as_ref().map_or(RemoteState::Absent, RemoteState::Live)
        };
        let action = plan_load(local.as_ref(), state, policy.as_ref()).await;

        let writes_local = matches!(
            action,
            LoadAction::StoreRemote(_) | LoadAction::KeepRemote(_) | LoadAction::DeleteLocal
        );
        if writes_local && self.inner.client.push_in_flight(&key) {
            debug!(key = %key, "push in flight, it will reconcile this key");
            return;
        }

        match action {
            LoadAction::Nothing | LoadAction::InSync => {}
            LoadAction::StoreRemote(value) | LoadAction::KeepRemote(value) => {
                self.write_local(&key, compressed, &value).await;
                self.deliver(&on_loaded, Some(value), true);
            }
            LoadAction::DeleteLocal => {
                self.delete_local(&key, compressed).await;
                self.deliver(&on_loaded, None, true);
            }
            LoadAction::PushLocal => {
                if let Some(value) = local {
                    self.inner.ledger.mark_pending(&key, tag, compressed);
                    self.enqueue_save_push(key, value, compressed, policy, None);
                }
            }
            LoadAction::Merged(merged) => {
                self.write_local(&key, compressed, &merged).await;
                self.inner.ledger.mark_pending(&key, tag, compressed);
                self.deliver(&on_loaded, Some(merged.clone()), true);
                let sent = merged.clone();
                let on_loaded = Arc::clone(&on_loaded);
                let on_final: FinalCallback<T> = Box::new(move |final_value: T| {
                    if final_value != sent {
                        on_loaded(Some(final_value), true);
                    }
                });
                self.enqueue_save_push(key, merged, compressed, policy, Some(on_final));
            }
            LoadAction::Undelete | LoadAction::OverwriteRemote => {
                if let Some(value) = local {
                    self.inner.ledger.mark_pending(&key, tag, compressed);
                    let on_loaded = Arc::clone(&on_loaded);
                    let on_final: FinalCallback<T> =
                        Box::new(move |final_value: T| on_loaded(Some(final_value), true));
                    self.enqueue_save_push(key, value, compressed, policy, Some(on_final));
                }
            }
        }
    }

    fn deliver<T: Syncable>(&self, on_loaded: &LoadCallback<T>, value: Option<T>, from_remote: bool) {
        let on_loaded = Arc::clone(on_loaded);
        self.inner.callbacks.post(move || on_loaded(value, from_remote));
    }

    // Delete

    /// Deletes the local file and pushes a tombstone.
    ///
    /// Returns whether a local file was removed. The tombstone carries
    /// `value`, which other replicas hand to their delete decision. Deletes
    /// bypass merging but still go through the version-checked write.
    ///
    /// # Errors
    ///
    /// Fails if the key is a folder pattern, the value cannot be encoded or
    /// the local delete fails.
    pub fn delete<T: Syncable>(&self, value: &T, key: &RecordKey) -> SyncResult<bool> {
        self.delete_as(value, key, false)
    }

    /// Like [`SyncEngine::delete`], for values saved with [`SyncEngine::save_compressed`].
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::delete`].
    pub fn delete_compressed<T: Syncable>(&self, value: &T, key: &RecordKey) -> SyncResult<bool> {
        self.delete_as(value, key, true)
    }

    fn delete_as<T: Syncable>(&self, value: &T, key: &RecordKey, compressed: bool) -> SyncResult<bool> {
        self.check_open()?;
        check_record_key(key)?;
        let payload = value.encode()?;
        let removed = self.inner.local.delete(&local_path(key, compressed))?;
        self.inner
            .ledger
            .mark_deleted(key, T::type_tag(), compressed, payload.clone());
        info!(key = %key, removed, "deleted locally");
        self.enqueue_tombstone_push(key.clone(), payload, T::type_tag().to_string());
        Ok(removed)
    }

    fn enqueue_tombstone_push(&self, key: RecordKey, payload: Vec<u8>, type_tag: String) {
        let engine = self.clone();
        let job_key = key.clone();
        self.inner.client.enqueue_push(
            &key,
            Box::pin(async move {
                match engine
                    .inner
                    .client
                    .push_tombstone(&job_key, payload, &type_tag)
                    .await
                {
                    Ok(outcome) => debug!(key = %job_key, ?outcome, "delete settled"),
                    Err(e) => log_push_failure(&job_key, &e),
                }
            }),
        );
    }

    // Local file access

    async fn read_local<T: Syncable>(&self, key: &RecordKey, compressed: bool) -> Option<T> {
        let local = Arc::clone(&self.inner.local);
        let compressor = self.inner.compressor;
        let path = local_path(key, compressed);
        let result = self
            .inner
            .workers
            .run(move || -> SyncResult<Option<T>> {
                let Some(raw) = local.read(&path)? else {
                    return Ok(None);
                };
                let modified = local.modified(&path)?;
                let bytes = if compressed && Compressor::is_compressed(&raw) {
                    compressor.decompress(&raw)?
                } else {
                    raw
                };
                Ok(Some(T::decode_local(&bytes, modified)?))
            })
            .await;

        match result {
            Ok(Ok(value)) => value,
            Ok(Err(e)) | Err(e) => {
                warn!(key = %key, error = %e, "local copy unreadable, treating as absent");
                None
            }
        }
    }

    async fn write_local<T: Syncable>(&self, key: &RecordKey, compressed: bool, value: &T) {
        let local = Arc::clone(&self.inner.local);
        let compressor = self.inner.compressor;
        let path = local_path(key, compressed);
        let value = value.clone();
        let result = self
            .inner
            .workers
            .run(move || -> SyncResult<()> {
                let bytes = encode_for_disk(&value, compressed, compressor)?;
                local.write_atomic(&path, &bytes)?;
                Ok(())
            })
            .await;

        match result {
            Ok(Ok(())) => debug!(key = %key, "local copy updated from remote"),
            Ok(Err(e)) | Err(e) => warn!(key = %key, error = %e, "failed to update local copy"),
        }
    }

    async fn delete_local(&self, key: &RecordKey, compressed: bool) {
        let local = Arc::clone(&self.inner.local);
        let path = local_path(key, compressed);
        let result = self
            .inner
            .workers
            .run(move || local.delete(&path))
            .await
            .and_then(|r| r.map_err(SyncError::from));
        if let Err(e) = result {
            warn!(key = %key, error = %e, "failed to delete local copy");
        }
    }

    // Recovery

    /// Registers `T` on first use and resubmits its unsynced records.
    ///
    /// The first policy seen for a type is kept for recovery pushes. A second
    /// type claiming an already registered tag is rejected, since recovery
    /// could not tell their records apart.
    fn register_type<T: Syncable>(&self, policy: &Arc<dyn SyncPolicy<T>>) -> SyncResult<()> {
        let id = TypeId::of::<T>();
        let tag = T::type_tag();
        let recovery: Recovery = {
            let mut types = self.inner.types.lock();
            if let Some(known) = types.iter().find(|t| t.id == id || t.tag == tag) {
                if known.id == id {
                    return Ok(());
                }
                return Err(SyncError::TypeTagConflict {
                    tag: tag.to_string(),
                    existing: known.name.to_string(),
                });
            }
            let policy = Arc::clone(policy);
            let recovery: Recovery = Arc::new(move |engine: &SyncEngine| engine.recover_type::<T>(&policy));
            types.push(RegisteredType {
                id,
                name: std::any::type_name::<T>(),
                tag,
                recovery: Arc::clone(&recovery),
            });
            recovery
        };
        info!(type_tag = tag, "syncable type registered");

        recovery(self);
        let weak = self.downgrade();
        self.inner.scheduler.add_permanent(move || {
            if let Some(engine) = SyncEngine::upgrade(&weak) {
                recovery(&engine);
            }
        });
        Ok(())
    }

    fn recover_type<T: Syncable>(&self, policy: &Arc<dyn SyncPolicy<T>>) {
        let tag = T::type_tag();
        let pending = self.inner.ledger.pending_saves(tag);
        let unfetched = self.inner.ledger.unfetched(tag);
        if pending.is_empty() && unfetched.is_empty() {
            return;
        }
        info!(
            type_tag = tag,
            pending = pending.len(),
            unfetched = unfetched.len(),
            "resubmitting unsynced records"
        );

        for record in pending {
            if self.inner.client.push_in_flight(&record.key) {
                continue;
            }
            self.enqueue_recovery_push::<T>(record.key, record.compressed, Arc::clone(policy));
        }
        for record in unfetched {
            let ignore: LoadCallback<T> = Arc::new(|_: Option<T>, _: bool| {});
            self.spawn_load(record.key, record.compressed, Arc::clone(policy), ignore, false);
        }
    }

    fn enqueue_recovery_push<T: Syncable>(
        &self,
        key: RecordKey,
        compressed: bool,
        policy: Arc<dyn SyncPolicy<T>>,
    ) {
        let engine = self.clone();
        let job_key = key.clone();
        self.inner.client.enqueue_push(
            &key,
            Box::pin(async move {
                match engine.read_local::<T>(&job_key, compressed).await {
                    Some(value) => {
                        engine
                            .run_save_push(job_key, value, compressed, policy, None)
                            .await;
                    }
                    None => {
                        warn!(key = %job_key, "pending save has no readable local copy, left pending");
                    }
                }
            }),
        );
    }

    fn recover_deletes(&self) {
        for record in self.inner.ledger.pending_deletes() {
            if self.inner.client.push_in_flight(&record.key) {
                continue;
            }
            info!(key = %record.key, "resubmitting pending delete");
            let payload = record.tombstone.unwrap_or_default();
            self.enqueue_tombstone_push(record.key, payload, record.type_tag);
        }
    }

    // Observers

    /// Watches `pattern` (an exact key or a folder prefix) for remote changes.
    ///
    /// Registration immediately scans the remote store and reports records
    /// whose version differs from the ledger, then subscribes to change
    /// notifications for the pattern.
    ///
    /// # Errors
    ///
    /// Fails only if the engine is shut down.
    pub fn observe(
        &self,
        pattern: &RecordKey,
        liveness: Liveness,
        on_change: impl Fn(Vec<ChangedItem>) + Send + Sync + 'static,
    ) -> SyncResult<ObserverId> {
        self.add_observer(pattern.clone(), None, liveness, Arc::new(on_change))
    }

    /// Watches `pattern` for remote changes to values of type `T`.
    ///
    /// Every changed record is loaded and reconciled; `on_change` receives
    /// the results that came from the remote side.
    ///
    /// # Errors
    ///
    /// Fails if another type already uses `T`'s type tag or the engine is shut down.
    pub fn observe_typed<T: Syncable>(
        &self,
        pattern: &RecordKey,
        liveness: Liveness,
        policy: Arc<dyn SyncPolicy<T>>,
        on_change: impl Fn(ChangeItem<T>) + Send + Sync + 'static,
    ) -> SyncResult<ObserverId> {
        self.check_open()?;
        self.register_type(&policy)?;

        let on_change = Arc::new(on_change);
        let weak = self.downgrade();
        let handler: ChangeHandler = Arc::new(move |items: Vec<ChangedItem>| {
            let Some(engine) = SyncEngine::upgrade(&weak) else {
                return;
            };
            for ChangedItem { key, path, root } in items {
                let compressed = engine
                    .inner
                    .ledger
                    .get(&key)
                    .map_or(false, |record| record.compressed);
                let on_change = Arc::clone(&on_change);
                let item_key = key.clone();
                let on_loaded: LoadCallback<T> = Arc::new(move |value: Option<T>, from_remote: bool| {
                    if from_remote {
                        on_change(ChangeItem {
                            key: item_key.clone(),
                            path: path.clone(),
                            root,
                            value,
                        });
                    }
                });
                engine.spawn_load(key, compressed, Arc::clone(&policy), on_loaded, false);
            }
        });
        self.add_observer(pattern.clone(), Some(T::type_tag()), liveness, handler)
    }

    fn add_observer(
        &self,
        pattern: RecordKey,
        type_tag: Option<&'static str>,
        liveness: Liveness,
        handler: ChangeHandler,
    ) -> SyncResult<ObserverId> {
        self.check_open()?;
        let registration = self.inner.observers.register(pattern, type_tag, liveness, handler);
        info!(observer = %registration.id, pattern = %registration.pattern, "observer registered");
        let id = registration.id;
        self.spawn_scans(vec![registration], true);
        Ok(id)
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    fn spawn_scans(&self, registrations: Vec<Arc<Registration>>, subscribe: bool) {
        for registration in registrations {
            let guard = self.inner.activity.enter();
            let engine = self.clone();
            self.inner.runtime.spawn(async move {
                let _guard = guard;
                if subscribe {
                    if let Err(failure) = engine.inner.client.subscribe(&registration.pattern).await {
                        debug!(
                            observer = %registration.id,
                            error = %SyncError::from(failure),
                            "subscription not established"
                        );
                    }
                }
                engine.scan(&registration).await;
            });
        }
    }

    async fn scan(&self, registration: &Registration) {
        if !registration.liveness.is_alive() {
            return;
        }
        let remote = match self
            .inner
            .client
            .query(&registration.pattern, registration.type_tag)
            .await
        {
            Ok(remote) => remote,
            Err(failure) => {
                debug!(observer = %registration.id, error = %SyncError::from(failure), "scan skipped");
                return;
            }
        };

        let changed: Vec<ChangedItem> = remote
            .into_iter()
            .filter(|record| match self.inner.ledger.get(&record.key) {
                Some(known) => known.version != record.version,
                None => !record.deleted,
            })
            .map(|record| ChangedItem::new(record.key))
            .collect();
        if changed.is_empty() {
            debug!(observer = %registration.id, "scan found no changes");
            return;
        }

        info!(observer = %registration.id, changes = changed.len(), "remote changes detected");
        let handler = Arc::clone(&registration.handler);
        self.inner.callbacks.post(move || handler(changed));
    }

    // Lifecycle

    /// Resubmits unsynced work and rescans every observer.
    ///
    /// Forward this from the platform's "application became active" event.
    pub fn did_become_active(&self) {
        if self.check_open().is_err() {
            return;
        }
        info!("application active, resubmitting unsynced work");
        let recoveries: Vec<Recovery> = self
            .inner
            .types
            .lock()
            .iter()
            .map(|t| Arc::clone(&t.recovery))
            .collect();
        for recovery in recoveries {
            recovery(self);
        }
        self.recover_deletes();
        self.spawn_scans(self.inner.observers.all(), false);
    }

    /// Handles a raw push-notification payload (JSON).
    ///
    /// Malformed payloads are treated as "something changed". Returns the
    /// number of observers rescanned.
    pub fn received_remote_notification(&self, payload: &[u8]) -> usize {
        let notification = RemoteNotification::from_json(payload).unwrap_or_else(|e| {
            debug!(error = %e, "unparseable notification, treating as unspecific");
            RemoteNotification::empty()
        });
        self.notify(&notification)
    }

    /// Rescans the observers a notification concerns. Returns how many.
    pub fn notify(&self, notification: &RemoteNotification) -> usize {
        if self.check_open().is_err() {
            return 0;
        }
        if !notification.is_for_namespace(&self.inner.config.namespace) {
            debug!(namespace = ?notification.namespace, "notification for another namespace ignored");
            return 0;
        }
        let matched = self.inner.observers.matching(notification);
        debug!(key = ?notification.key, observers = matched.len(), "remote notification");
        let count = matched.len();
        self.spawn_scans(matched, false);
        count
    }

    /// Reports a reachability change. Returns the number of retries run.
    pub fn set_reachability(&self, reachability: Reachability) -> usize {
        self.inner.scheduler.set_reachability(reachability)
    }

    /// Current reachability.
    pub fn reachability(&self) -> Reachability {
        self.inner.scheduler.reachability()
    }

    /// Returns true once a categorical remote failure disabled remote sync.
    pub fn is_remote_disabled(&self) -> bool {
        self.inner.client.is_disabled()
    }

    /// Remote traffic counters.
    pub fn stats(&self) -> SyncStats {
        self.inner.client.stats()
    }

    /// The ledger entry for `key`.
    pub fn known_record(&self, key: &RecordKey) -> Option<KnownRecord> {
        self.inner.ledger.get(key)
    }

    /// All ledger entries, sorted by key.
    pub fn known_records(&self) -> Vec<KnownRecord> {
        self.inner.ledger.entries()
    }

    /// Writes the ledger now if it has unflushed changes.
    ///
    /// # Errors
    ///
    /// Fails if the ledger cannot be encoded or written.
    pub fn flush_ledger(&self) -> SyncResult<bool> {
        self.inner.ledger.flush()
    }

    /// Waits until no push, load, scan or callback is outstanding.
    ///
    /// Work deferred until the network returns does not count.
    pub async fn wait_idle(&self) {
        self.inner.activity.wait_idle().await;
    }

    /// Stops background tasks and flushes the ledger.
    ///
    /// Queued callbacks still run. Pushes that have not completed stay
    /// pending in the ledger and are resubmitted by the next engine.
    ///
    /// # Errors
    ///
    /// Fails if the final ledger write fails.
    pub async fn shutdown(&self) -> SyncResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("sync engine shutting down");
        let _ = self.inner.shutdown.send(true);
        self.inner.callbacks.close();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        self.inner.workers.close();
        self.inner.ledger.flush_blocking().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("namespace", &self.inner.config.namespace)
            .field("records", &self.inner.ledger.len())
            .field("observers", &self.inner.observers.len())
            .field("reachability", &self.reachability())
            .field("remote_disabled", &self.is_remote_disabled())
            .finish()
    }
}

fn check_record_key(key: &RecordKey) -> SyncResult<()> {
    if key.is_prefix() {
        return Err(SyncError::InvalidKey(format!("{key} is a folder pattern")));
    }
    Ok(())
}

fn encode_for_disk<T: Syncable>(value: &T, compressed: bool, compressor: Compressor) -> SyncResult<Vec<u8>> {
    let bytes = value.encode_local()?;
    if compressed {
        Ok(compressor.compress(&bytes)?)
    } else {
        Ok(bytes)
    }
}

fn log_push_failure(key: &RecordKey, error: &SyncError) {
    match error {
        SyncError::Offline => info!(key = %key, "push deferred until the network returns"),
        SyncError::RemoteDisabled => debug!(key = %key, "remote disabled, push skipped"),
        other => warn!(key = %key, error = %other, "push abandoned"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MemoryRemoteStore;
    use recordsync_protocol::NeverOverwrite;
    use recordsync_storage::InMemoryStore;
    use serde::{Deserialize, Serialize};
    use std::path::Path;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Syncable for Note {}

    fn engine() -> (SyncEngine, Arc<InMemoryStore>, Arc<MemoryRemoteStore>) {
        let local = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let config = SyncConfig::new("test")
            .with_data_dir("/data")
            .with_fetch_debounce(Duration::from_millis(1))
            .with_retry(RetryConfig::immediate());
        let engine = SyncEngine::init(config, local.clone(), remote.clone()).unwrap();
        (engine, local, remote)
    }

    fn note(text: &str) -> Note {
        Note { text: text.into() }
    }

    #[tokio::test]
    async fn keys_from_full_paths() {
        let (engine, _, _) = engine();
        let a = engine.key("/data/documents/notes/1", StorageRoot::Documents);
        let b = engine.key("notes/1", StorageRoot::Documents);
        assert_eq!(a, b);
        assert_eq!(a.path(), "notes/1");
    }

    #[tokio::test]
    async fn folder_keys_rejected() {
        let (engine, _, _) = engine();
        let folder = engine.key("notes/", StorageRoot::Documents);
        let policy: Arc<dyn SyncPolicy<Note>> = Arc::new(NeverOverwrite);

        let err = engine.save(&note("x"), &folder, policy.clone(), |_| {}).unwrap_err();
        assert!(matches!(err, SyncError::InvalidKey(_)));
        assert!(matches!(
            engine.load(&folder, policy, |_, _| {}),
            Err(SyncError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn save_writes_local_copy_synchronously() {
        let (engine, local, _) = engine();
        let key = engine.key("notes/1", StorageRoot::Documents);

        let written = engine
            .save(&note("hi"), &key, Arc::new(NeverOverwrite), |_| {})
            .unwrap();
        assert_eq!(
            local.read(Path::new("documents/notes/1")).unwrap(),
            Some(written)
        );
        assert!(engine.known_record(&key).unwrap().pending_save);
        engine.wait_idle().await;
    }

    #[tokio::test]
    async fn compressed_variant_uses_suffix() {
        let (engine, local, _) = engine();
        let key = engine.key("notes/big", StorageRoot::Documents);

        let written = engine
            .save_compressed(&note("hi"), &key, Arc::new(NeverOverwrite), |_| {})
            .unwrap();
        assert!(Compressor::is_compressed(&written));
        assert!(local.exists(Path::new("documents/notes/big.zst")).unwrap());

        engine.save(&note("hi"), &key, Arc::new(NeverOverwrite), |_| {}).unwrap();
        assert!(!local.exists(Path::new("documents/notes/big.zst")).unwrap());
        assert!(local.exists(Path::new("documents/notes/big")).unwrap());
        engine.wait_idle().await;
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Impostor {
        text: String,
    }

    impl Syncable for Impostor {
        fn type_tag() -> &'static str {
            Note::type_tag()
        }
    }

    #[tokio::test]
    async fn shared_type_tag_rejected() {
        let (engine, _, _) = engine();
        let key = engine.key("notes/1", StorageRoot::Documents);
        engine.save(&note("x"), &key, Arc::new(NeverOverwrite), |_| {}).unwrap();

        let other = engine.key("notes/2", StorageRoot::Documents);
        let impostor = Impostor { text: "y".into() };
        let err = engine
            .save(&impostor, &other, Arc::new(NeverOverwrite), |_| {})
            .unwrap_err();
        assert!(matches!(err, SyncError::TypeTagConflict { .. }));
        assert!(engine.known_record(&other).is_none());

        // The first type keeps working.
        engine.load(&key, Arc::new(NeverOverwrite), |_: Option<Note>, _| {}).unwrap();
        engine.wait_idle().await;
    }

    #[tokio::test]
    async fn operations_fail_after_shutdown() {
        let (engine, _, _) = engine();
        let key = engine.key("notes/1", StorageRoot::Documents);
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();

        assert!(matches!(
            engine.save(&note("x"), &key, Arc::new(NeverOverwrite), |_| {}),
            Err(SyncError::ShutDown)
        ));
        assert_eq!(engine.received_remote_notification(b"{}"), 0);
    }
}
