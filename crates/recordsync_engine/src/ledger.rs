//! The local known-records ledger.
//!
//! One entry per record key the engine has seen, persisted as a single CBOR
//! file in the local store. Mutations only mark the ledger dirty; a flush
//! task writes it out at a fixed interval, so bursts of updates coalesce into
//! one disk write.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use recordsync_protocol::{cbor_decode, cbor_encode, RecordKey, VersionToken};
use recordsync_storage::LocalStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LEDGER_FORMAT: u16 = 1;

/// Last known state of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownRecord {
    /// Record key, including the logical path and root.
    pub key: RecordKey,
    /// Last remote version seen or written. Unknown until the first fetch or push.
    pub version: VersionToken,
    /// A local change has not been confirmed by the remote store yet.
    pub pending_save: bool,
    /// The record is deleted (remote tombstone seen, or local delete pending).
    pub deleted: bool,
    /// Type tag of the value.
    pub type_tag: String,
    /// The local file is compressed.
    pub compressed: bool,
    /// Encoded value carried by a pending tombstone, resent if the delete is recovered.
    #[serde(default)]
    pub tombstone: Option<Vec<u8>>,
}

impl KnownRecord {
    fn new(key: RecordKey, type_tag: &str, compressed: bool) -> Self {
        Self {
            key,
            version: VersionToken::unknown(),
            pending_save: false,
            deleted: false,
            type_tag: type_tag.to_string(),
            compressed,
            tombstone: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    format: u16,
    records: Vec<KnownRecord>,
}

/// Persisted table of known records.
pub struct LocalKnownRecords {
    store: Arc<dyn LocalStore>,
    path: PathBuf,
    records: Mutex<HashMap<RecordKey, KnownRecord>>,
    dirty: AtomicBool,
}

impl LocalKnownRecords {
    /// Loads the ledger from `path`, starting empty if it is missing or unreadable.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    pub fn load(store: Arc<dyn LocalStore>, path: &Path) -> SyncResult<Self> {
        let records = match store.read(path)? {
            None => HashMap::new(),
            Some(bytes) => match cbor_decode::<LedgerFile>(&bytes) {
                Ok(file) if file.format == LEDGER_FORMAT => file
                    .records
                    .into_iter()
                    .map(|r| (r.key.clone(), r))
                    .collect(),
                Ok(file) => {
                    warn!(format = file.format, "unsupported ledger format, starting empty");
                    HashMap::new()
                }
                Err(e) => {
                    warn!(error = %e, "ledger unreadable, starting empty");
                    HashMap::new()
                }
            },
        };
        debug!(records = records.len(), "ledger loaded");

        Ok(Self {
            store,
            path: path.to_path_buf(),
            records: Mutex::new(records),
            dirty: AtomicBool::new(false),
        })
    }

    /// Returns the entry for `key`.
    pub fn get(&self, key: &RecordKey) -> Option<KnownRecord> {
        self.records.lock().get(key).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Vec<KnownRecord> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Entries matched by `pattern` (exact key, or everything under a prefix).
    pub fn matching(&self, pattern: &RecordKey) -> Vec<KnownRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| pattern.matches(&r.key))
            .cloned()
            .collect()
    }

    /// Entries of one type awaiting confirmation of a save.
    pub fn pending_saves(&self, type_tag: &str) -> Vec<KnownRecord> {
        self.filtered(|r| r.pending_save && !r.deleted && r.type_tag == type_tag)
    }

    /// Entries awaiting confirmation of a delete, of any type.
    pub fn pending_deletes(&self) -> Vec<KnownRecord> {
        self.filtered(|r| r.pending_save && r.deleted)
    }

    /// Entries of one type whose remote version has never been seen.
    pub fn unfetched(&self, type_tag: &str) -> Vec<KnownRecord> {
        self.filtered(|r| {
            !r.pending_save && !r.deleted && r.version.is_unknown() && r.type_tag == type_tag
        })
    }

    fn filtered(&self, f: impl Fn(&KnownRecord) -> bool) -> Vec<KnownRecord> {
        let mut out: Vec<_> = self.records.lock().values().filter(|r| f(r)).cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Creates an entry for a key seen for the first time. Existing entries are untouched.
    pub fn ensure(&self, key: &RecordKey, type_tag: &str, compressed: bool) {
        let mut records = self.records.lock();
        if !records.contains_key(key) {
            records.insert(key.clone(), KnownRecord::new(key.clone(), type_tag, compressed));
            self.mark_dirty();
        }
    }

    /// Records a local save that must reach the remote store.
    pub fn mark_pending(&self, key: &RecordKey, type_tag: &str, compressed: bool) {
        self.update(key, type_tag, compressed, |r| {
            r.pending_save = true;
            r.deleted = false;
            r.tombstone = None;
        });
    }

    /// Records a local delete whose tombstone, carrying `payload`, must reach the remote store.
    pub fn mark_deleted(&self, key: &RecordKey, type_tag: &str, compressed: bool, payload: Vec<u8>) {
        self.update(key, type_tag, compressed, |r| {
            r.pending_save = true;
            r.deleted = true;
            r.tombstone = Some(payload);
        });
    }

    /// Records a fetched remote version. The pending flag is preserved.
    pub fn record_fetched(
        &self,
        key: &RecordKey,
        type_tag: &str,
        compressed: bool,
        version: &VersionToken,
        deleted: bool,
    ) {
        self.update(key, type_tag, compressed, |r| {
            r.version = version.clone();
            if !r.pending_save {
                r.deleted = deleted;
            }
        });
    }

    /// Records a confirmed remote write.
    ///
    /// A confirmed delete removes the entry; anything else stores the new
    /// version and clears the pending flag.
    pub fn confirm(&self, key: &RecordKey, version: &VersionToken, deleted: bool) {
        let mut records = self.records.lock();
        if deleted {
            if records.remove(key).is_some() {
                self.mark_dirty();
            }
            return;
        }
        if let Some(record) = records.get_mut(key) {
            record.version = version.clone();
            record.pending_save = false;
            record.deleted = false;
            record.tombstone = None;
            self.mark_dirty();
        }
    }

    /// Stores a written version without settling the entry.
    ///
    /// Used when a later push for the same key is already queued; the entry
    /// stays pending until that push completes.
    pub fn set_version(&self, key: &RecordKey, version: &VersionToken) {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(key) {
            if record.version != *version {
                record.version = version.clone();
                self.mark_dirty();
            }
        }
    }

    /// Removes an entry.
    pub fn remove(&self, key: &RecordKey) -> bool {
        let removed = self.records.lock().remove(key).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    fn update(
        &self,
        key: &RecordKey,
        type_tag: &str,
        compressed: bool,
        f: impl FnOnce(&mut KnownRecord),
    ) {
        let mut records = self.records.lock();
        let record = records
            .entry(key.clone())
            .or_insert_with(|| KnownRecord::new(key.clone(), type_tag, compressed));
        let before = record.clone();
        record.type_tag = type_tag.to_string();
        record.compressed = compressed;
        f(record);
        if *record != before {
            self.mark_dirty();
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Returns true if there are unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Writes the ledger if it is dirty. Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails; the ledger stays dirty.
    pub fn flush(&self) -> SyncResult<bool> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let file = LedgerFile {
            format: LEDGER_FORMAT,
            records: self.entries(),
        };
        let result: SyncResult<()> = cbor_encode(&file)
            .map_err(SyncError::from)
            .and_then(|bytes| Ok(self.store.write_atomic(&self.path, &bytes)?));
        match result {
            Ok(()) => {
                debug!(records = file.records.len(), "ledger flushed");
                Ok(true)
            }
            Err(e) => {
                self.mark_dirty();
                Err(e)
            }
        }
    }

    /// Flushes on the blocking thread pool.
    pub(crate) async fn flush_blocking(self: &Arc<Self>) -> SyncResult<bool> {
        let ledger = Arc::clone(self);
        tokio::task::spawn_blocking(move || ledger.flush())
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))?
    }

    /// Spawns the interval flush task. It flushes once more when `shutdown` fires.
    ///
    /// Store writes run on the blocking thread pool.
    pub fn spawn_flush_task(
        self: &Arc<Self>,
        handle: &tokio::runtime::Handle,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if let Err(e) = ledger.flush_blocking().await {
                    warn!(error = %e, "ledger flush failed");
                }
            }
            if let Err(e) = ledger.flush_blocking().await {
                warn!(error = %e, "final ledger flush failed");
            }
        })
    }
}

impl std::fmt::Debug for LocalKnownRecords {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKnownRecords")
            .field("path", &self.path)
            .field("records", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
