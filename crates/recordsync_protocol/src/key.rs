//! Record keys.
//!
//! A record key is the identity of one synced item. It is derived from the
//! item's logical path plus the storage root it lives under:
//!
//! ```text
//! R<root-code>:<logical path>        e.g. R1:saves/slot1.json
//! R<root-code>:<sha256 hex of path>  when the path is MAX_KEY_PATH_LEN chars or longer
//! ```
//!
//! A key whose path ends with [`PATH_SEPARATOR`] (or is empty) is a *prefix
//! pattern*: it matches every key underneath that folder.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Paths with at least this many characters are content-hashed in the key.
pub const MAX_KEY_PATH_LEN: usize = 250;

/// Separator used in logical paths. A trailing separator marks a prefix pattern.
pub const PATH_SEPARATOR: char = '/';

const KEY_PREFIX: &str = "R";

/// The local storage root a logical path is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageRoot {
    /// Per-application support data. The default root.
    ApplicationSupport,
    /// User-visible documents.
    Documents,
    /// Purgeable caches.
    Caches,
    /// Application-defined root, identified by number.
    Custom(u16),
}

impl StorageRoot {
    /// Returns the numeric discriminator embedded in record keys.
    pub fn code(&self) -> u32 {
        match self {
            StorageRoot::ApplicationSupport => 1,
            StorageRoot::Documents => 2,
            StorageRoot::Caches => 3,
            StorageRoot::Custom(n) => 1000 + u32::from(*n),
        }
    }

    /// Converts a discriminator back into a root.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(StorageRoot::ApplicationSupport),
            2 => Some(StorageRoot::Documents),
            3 => Some(StorageRoot::Caches),
            c if c >= 1000 => u16::try_from(c - 1000).ok().map(StorageRoot::Custom),
            _ => None,
        }
    }

    /// Directory name used for this root under a local data directory.
    pub fn dir_name(&self) -> String {
        match self {
            StorageRoot::ApplicationSupport => "application-support".into(),
            StorageRoot::Documents => "documents".into(),
            StorageRoot::Caches => "caches".into(),
            StorageRoot::Custom(n) => format!("custom-{n}"),
        }
    }
}

impl Default for StorageRoot {
    fn default() -> Self {
        StorageRoot::ApplicationSupport
    }
}

/// Stable identity of a synced item.
///
/// Equality, hashing and ordering use the key id only; the logical path and
/// root are carried along so that hashed keys can still be mapped back to
/// their local file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordKey {
    id: String,
    path: String,
    root: StorageRoot,
}

impl RecordKey {
    /// Derives the key for a logical path under `root`.
    ///
    /// Leading separators are ignored, so `"/a/b"` and `"a/b"` yield the same key.
    pub fn new(path: &str, root: StorageRoot) -> Self {
        let path = path.trim_start_matches(PATH_SEPARATOR).to_string();
        let is_pattern = path.is_empty() || path.ends_with(PATH_SEPARATOR);
        let body = if is_pattern || path.chars().count() < MAX_KEY_PATH_LEN {
            path.clone()
        } else {
            hash_path(&path)
        };

        Self {
            id: format!("{KEY_PREFIX}{}:{body}", root.code()),
            path,
            root,
        }
    }

    /// Parses a key id produced by [`RecordKey::id`].
    ///
    /// For hashed keys the logical path cannot be recovered; the returned key
    /// carries the hash as its path.
    pub fn parse(id: &str) -> Option<Self> {
        let rest = id.strip_prefix(KEY_PREFIX)?;
        let (code, body) = rest.split_once(':')?;
        let root = StorageRoot::from_code(code.parse().ok()?)?;
        Some(Self {
            id: id.to_string(),
            path: body.to_string(),
            root,
        })
    }

    /// Rebuilds a key from its persisted parts.
    pub fn from_parts(id: impl Into<String>, path: impl Into<String>, root: StorageRoot) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            root,
        }
    }

    /// The key id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The logical path, relative to the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The storage root.
    pub fn root(&self) -> StorageRoot {
        self.root
    }

    /// Returns true if this key is a folder pattern.
    pub fn is_prefix(&self) -> bool {
        self.path.is_empty() || self.path.ends_with(PATH_SEPARATOR)
    }

    /// Returns true if the path was replaced by its hash.
    pub fn is_hashed(&self) -> bool {
        self.id
            .split_once(':')
            .map(|(_, body)| body != self.path)
            .unwrap_or(false)
    }

    /// Matches another key id against this key.
    ///
    /// Prefix patterns match every id they are a prefix of; plain keys
    /// match only themselves.
    pub fn matches_id(&self, other_id: &str) -> bool {
        if self.is_prefix() {
            other_id.starts_with(&self.id)
        } else {
            other_id == self.id
        }
    }

    /// Matches another key against this key.
    pub fn matches(&self, other: &RecordKey) -> bool {
        self.matches_id(other.id())
    }

    /// Matches a bare logical path (no root information) against this key.
    pub fn matches_path(&self, path: &str) -> bool {
        let path = path.trim_start_matches(PATH_SEPARATOR);
        if self.is_prefix() {
            path.starts_with(&self.path)
        } else {
            path == self.path
        }
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RecordKey {}

impl Hash for RecordKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

fn hash_path(path: &str) -> String {
    Sha256::digest(path.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_format() {
        let key = RecordKey::new("saves/slot1.json", StorageRoot::ApplicationSupport);
        assert_eq!(key.id(), "R1:saves/slot1.json");
        assert_eq!(key.path(), "saves/slot1.json");
        assert!(!key.is_prefix());
        assert!(!key.is_hashed());
    }

    #[test]
    fn leading_separator_ignored() {
        let a = RecordKey::new("/a/b", StorageRoot::Documents);
        let b = RecordKey::new("a/b", StorageRoot::Documents);
        assert_eq!(a, b);
    }

    #[test]
    fn roots_discriminate() {
        let a = RecordKey::new("a", StorageRoot::Documents);
        let b = RecordKey::new("a", StorageRoot::Caches);
        assert_ne!(a, b);
    }

    #[test]
    fn long_paths_are_hashed() {
        let path = "x".repeat(MAX_KEY_PATH_LEN);
        let key = RecordKey::new(&path, StorageRoot::ApplicationSupport);
        assert!(key.is_hashed());
        assert_eq!(key.path(), path);
        // "R1:" + 64 hex chars
        assert_eq!(key.id().len(), 3 + 64);

        let short = "x".repeat(MAX_KEY_PATH_LEN - 1);
        assert!(!RecordKey::new(&short, StorageRoot::ApplicationSupport).is_hashed());
    }

    #[test]
    fn prefix_matching() {
        let folder = RecordKey::new("saves/", StorageRoot::ApplicationSupport);
        assert!(folder.is_prefix());

        let inside = RecordKey::new("saves/slot1", StorageRoot::ApplicationSupport);
        let outside = RecordKey::new("other/slot1", StorageRoot::ApplicationSupport);
        let other_root = RecordKey::new("saves/slot1", StorageRoot::Documents);

        assert!(folder.matches(&inside));
        assert!(!folder.matches(&outside));
        assert!(!folder.matches(&other_root));
        assert!(folder.matches_path("saves/slot2"));
        assert!(!folder.matches_path("slot2"));

        assert!(inside.matches(&inside.clone()));
        assert!(!inside.matches(&folder));
        assert!(inside.matches_path("/saves/slot1"));
    }

    #[test]
    fn parse_roundtrip() {
        let key = RecordKey::new("a/b.json", StorageRoot::Custom(7));
        let parsed = RecordKey::parse(key.id()).unwrap();
        assert_eq!(parsed, key);
        assert_eq!(parsed.root(), StorageRoot::Custom(7));
        assert_eq!(parsed.path(), "a/b.json");

        assert!(RecordKey::parse("nonsense").is_none());
        assert!(RecordKey::parse("R99:x").is_none());
    }

    #[test]
    fn root_codes() {
        for root in [
            StorageRoot::ApplicationSupport,
            StorageRoot::Documents,
            StorageRoot::Caches,
            StorageRoot::Custom(0),
            StorageRoot::Custom(u16::MAX),
        ] {
            assert_eq!(StorageRoot::from_code(root.code()), Some(root));
        }
        assert_eq!(StorageRoot::from_code(0), None);
    }

    proptest! {
        #[test]
        fn derivation_is_stable_and_bounded(path in "[a-z/]{0,399}[a-z]", code in 0u16..8) {
            let root = StorageRoot::Custom(code);
            let a = RecordKey::new(&path, root);
            let b = RecordKey::new(&path, root);
            prop_assert_eq!(a.id(), b.id());
            prop_assert!(a.id().len() <= MAX_KEY_PATH_LEN + 16);
        }
    }
}
