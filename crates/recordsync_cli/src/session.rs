//! Engine setup shared by the commands.

use crate::document::{self, JsonDocument};
use crate::remote::DirRemoteStore;
use recordsync_engine::{SyncConfig, SyncEngine};
use recordsync_protocol::{RecordKey, StorageRoot, SyncPolicy};
use recordsync_storage::FileStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options common to every command.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Local data directory.
    pub data: PathBuf,
    /// Remote directory.
    pub remote: PathBuf,
    /// Remote namespace.
    pub namespace: String,
    /// Storage root for paths given on the command line.
    pub root: StorageRoot,
    /// Store local files compressed.
    pub compressed: bool,
    /// Merge JSON objects on conflict.
    pub merge: bool,
    /// Inline size limit of the remote directory, for exercising blob spill.
    pub max_inline: Option<usize>,
}

/// A running engine plus the document policy.
pub struct Session {
    /// The engine.
    pub engine: SyncEngine,
    /// Policy for [`JsonDocument`] values.
    pub policy: Arc<dyn SyncPolicy<JsonDocument>>,
    options: SessionOptions,
}

impl Session {
    /// Opens the local store and starts the engine.
    pub fn open(options: SessionOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let local = FileStore::open(&options.data, true)?;
        let remote = DirRemoteStore::new(&options.remote).with_max_inline(options.max_inline);
        let config = SyncConfig::new(options.namespace.clone())
            .with_data_dir(absolute(&options.data)?)
            .with_blob_dir(options.data.join(".blobs"));
        let engine = SyncEngine::init(config, Arc::new(local), Arc::new(remote))?;
        Ok(Self {
            engine,
            policy: document::policy(options.merge),
            options,
        })
    }

    /// Key for a path given on the command line.
    pub fn key(&self, path: &str) -> RecordKey {
        self.engine.key(path, self.options.root)
    }

    /// Whether local files are compressed.
    pub fn compressed(&self) -> bool {
        self.options.compressed
    }

    /// Waits for outstanding work and stops the engine.
    pub async fn close(self) -> Result<(), Box<dyn std::error::Error>> {
        self.engine.wait_idle().await;
        self.engine.shutdown().await?;
        Ok(())
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Parses a storage root name as accepted on the command line.
pub fn parse_root(name: &str) -> Result<StorageRoot, String> {
    match name {
        "application-support" | "app" => Ok(StorageRoot::ApplicationSupport),
        "documents" | "docs" => Ok(StorageRoot::Documents),
        "caches" => Ok(StorageRoot::Caches),
        other => other
            .strip_prefix("custom-")
            .and_then(|n| n.parse().ok())
            .map(StorageRoot::Custom)
            .ok_or_else(|| format!("unknown storage root: {other}")),
    }
}
