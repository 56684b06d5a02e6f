//! # recordsync Storage
//!
//! Local storage collaborators for the recordsync engine.
//!
//! Stores are **opaque byte stores** addressed by relative paths. They do not
//! know about record keys, ledgers or remote state; the engine decides which
//! relative path a record lives at.
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing
//! - [`FileStore`] - Persistent storage under a locked data directory
//!
//! Payload compression lives in [`Compressor`] (zstd with magic-byte detection).
//!
//! ## Example
//!
//! ```rust
//! use recordsync_storage::{InMemoryStore, LocalStore};
//! use std::path::Path;
//!
//! let store = InMemoryStore::new();
//! store.write_atomic(Path::new("saves/slot1"), b"hello").unwrap();
//! assert_eq!(store.read(Path::new("saves/slot1")).unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compression;
mod error;
mod file;
mod memory;
mod store;

pub use compression::{Compressor, COMPRESSED_SUFFIX, DEFAULT_COMPRESSION_LEVEL};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::LocalStore;
