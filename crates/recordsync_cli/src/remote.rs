//! Directory-backed remote store.
//!
//! Every record is one CBOR file under `<dir>/<namespace>/`, named after the
//! SHA-256 of its key id. Writes hold an exclusive lock on the namespace
//! directory, so several processes can share one remote directory.

use async_trait::async_trait;
use fs2::FileExt;
use recordsync_engine::RemoteStore;
use recordsync_protocol::{
    Payload, RecordDraft, RecordKey, RecordVersion, RemoteError, RemoteResult, RemoteSnapshot,
    VersionToken,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

const LOCK_FILE: &str = ".lock";
const RECORD_EXT: &str = "rec";

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: RecordKey,
    version: VersionToken,
    bytes: Vec<u8>,
    deleted: bool,
    type_tag: String,
}

impl StoredRecord {
    fn snapshot(self) -> RemoteSnapshot {
        RemoteSnapshot {
            key: self.key,
            version: self.version,
            payload: Payload::Inline(self.bytes),
            deleted: self.deleted,
            type_tag: self.type_tag,
        }
    }
}

/// A remote store kept in a local (or mounted) directory.
#[derive(Debug)]
pub struct DirRemoteStore {
    root: PathBuf,
    max_inline: Option<usize>,
    namespace_dir: OnceLock<PathBuf>,
}

impl DirRemoteStore {
    /// Creates a store rooted at `root`. The directory must exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_inline: None,
            namespace_dir: OnceLock::new(),
        }
    }

    /// Rejects inline payloads larger than `bytes`.
    pub fn with_max_inline(mut self, bytes: Option<usize>) -> Self {
        self.max_inline = bytes;
        self
    }

    fn dir(&self) -> RemoteResult<&Path> {
        self.namespace_dir
            .get()
            .map(PathBuf::as_path)
            .ok_or_else(|| RemoteError::Other("namespace not opened".into()))
    }

    fn record_path(dir: &Path, key: &RecordKey) -> PathBuf {
        let digest = Sha256::digest(key.id().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        dir.join(format!("{name}.{RECORD_EXT}"))
    }

    fn read_record(path: &Path) -> RemoteResult<Option<StoredRecord>> {
        match fs::read(path) {
            Ok(bytes) => ciborium::from_reader(bytes.as_slice())
                .map(Some)
                .map_err(|e| RemoteError::Other(format!("corrupt record {}: {e}", path.display()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    fn lock(dir: &Path) -> RemoteResult<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))
            .map_err(io_error)?;
        file.lock_exclusive().map_err(io_error)?;
        Ok(file)
    }

    fn store(path: &Path, record: &StoredRecord) -> RemoteResult<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(record, &mut bytes)
            .map_err(|e| RemoteError::Other(format!("record encode: {e}")))?;
        let temp = path.with_extension("tmp");
        fs::write(&temp, &bytes).map_err(io_error)?;
        fs::rename(&temp, path).map_err(io_error)
    }
}

fn io_error(e: io::Error) -> RemoteError {
    RemoteError::Other(e.to_string())
}

#[async_trait]
impl RemoteStore for DirRemoteStore {
    async fn ensure_namespace_ready(&self, namespace: &str) -> RemoteResult<()> {
        if !self.root.is_dir() {
            return Err(RemoteError::Network(format!(
                "remote directory not available: {}",
                self.root.display()
            )));
        }
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir).map_err(io_error)?;
        debug!(dir = %dir.display(), "namespace opened");
        let _ = self.namespace_dir.set(dir);
        Ok(())
    }

    async fn fetch_batch(
        &self,
        keys: &[RecordKey],
    ) -> RemoteResult<HashMap<RecordKey, RemoteSnapshot>> {
        let dir = self.dir()?;
        let mut found = HashMap::new();
        for key in keys {
            if let Some(record) = Self::read_record(&Self::record_path(dir, key))? {
                found.insert(key.clone(), record.snapshot());
            }
        }
        Ok(found)
    }

    async fn write(
        &self,
        draft: &RecordDraft,
        expected: &VersionToken,
    ) -> RemoteResult<VersionToken> {
        let dir = self.dir()?;
        let bytes = match &draft.payload {
            Payload::Inline(bytes) => {
                if let Some(max) = self.max_inline {
                    if bytes.len() > max {
                        return Err(RemoteError::TooLarge { size: bytes.len() });
                    }
                }
                bytes.clone()
            }
            Payload::Blob(blob) => fs::read(&blob.path).map_err(io_error)?,
        };

        let _lock = Self::lock(dir)?;
        let path = Self::record_path(dir, &draft.key);
        let current = Self::read_record(&path)?.map(|r| r.version);
        let matches = match &current {
            None => expected.is_unknown(),
            Some(version) => version == expected,
        };
        if !matches {
            debug!(key = %draft.key, expected = %expected, "version mismatch");
            return Err(RemoteError::Conflict);
        }

        let version = VersionToken::new(uuid::Uuid::new_v4().to_string());
        Self::store(
            &path,
            &StoredRecord {
                key: draft.key.clone(),
                version: version.clone(),
                bytes,
                deleted: draft.deleted,
                type_tag: draft.type_tag.clone(),
            },
        )?;
        Ok(version)
    }

    async fn query(
        &self,
        pattern: &RecordKey,
        type_tag: Option<&str>,
    ) -> RemoteResult<Vec<RecordVersion>> {
        let dir = self.dir()?;
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(record) = Self::read_record(&path)? else {
                continue;
            };
            if !pattern.matches(&record.key) || type_tag.map_or(false, |t| t != record.type_tag) {
                continue;
            }
            out.push(RecordVersion {
                key: record.key,
                version: record.version,
                deleted: record.deleted,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn subscribe(&self, pattern: &RecordKey) -> RemoteResult<()> {
        debug!(pattern = %pattern, "directory store has no push channel, changes are polled");
        Ok(())
    }
}
