//! Mapping between record keys and local file paths.

use recordsync_protocol::{RecordKey, StorageRoot, PATH_SEPARATOR};
use recordsync_storage::Compressor;
use std::path::{Path, PathBuf};

/// Relative path of a record's local file inside the local store.
///
/// Files live under a folder per storage root; compressed files carry the
/// compression suffix.
pub fn local_path(key: &RecordKey, compressed: bool) -> PathBuf {
    let plain = Path::new(&key.root().dir_name()).join(key.path());
    if compressed {
        Compressor::suffixed(&plain)
    } else {
        plain
    }
}

/// Reduces a path to its logical form.
///
/// A path given with the absolute prefix of the root folder (`data_dir`
/// joined with the root's folder name) is stripped to the part below it.
/// Anything else is taken as already logical.
pub fn logical_path(path: &str, root: StorageRoot, data_dir: Option<&Path>) -> String {
    if let Some(dir) = data_dir {
        let root_dir = dir.join(root.dir_name());
        if let Ok(rest) = Path::new(path).strip_prefix(&root_dir) {
            let mut logical = rest
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(&PATH_SEPARATOR.to_string());
            if path.ends_with(PATH_SEPARATOR) && !logical.is_empty() {
                logical.push(PATH_SEPARATOR);
            }
            return logical;
        }
    }
    path.trim_start_matches(PATH_SEPARATOR).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_by_root() {
        let key = RecordKey::new("saves/slot1", StorageRoot::Documents);
        assert_eq!(local_path(&key, false), PathBuf::from("documents/saves/slot1"));
        assert_eq!(local_path(&key, true), PathBuf::from("documents/saves/slot1.zst"));

        let key = RecordKey::new("already.zst", StorageRoot::ApplicationSupport);
        assert_eq!(
            local_path(&key, true),
            PathBuf::from("application-support/already.zst")
        );
    }

    #[test]
    fn long_paths_keep_their_file_name() {
        let long = format!("deep/{}", "x".repeat(300));
        let key = RecordKey::new(&long, StorageRoot::Caches);
        assert!(key.is_hashed());
        assert_eq!(local_path(&key, false), Path::new("caches").join(&long));
    }

    #[test]
    fn full_paths_are_stripped() {
        let data = Path::new("/var/app");
        assert_eq!(
            logical_path("/var/app/documents/saves/1", StorageRoot::Documents, Some(data)),
            "saves/1"
        );
        assert_eq!(
            logical_path("/var/app/documents/saves/", StorageRoot::Documents, Some(data)),
            "saves/"
        );
        // A different root's folder is not stripped.
        assert_eq!(
            logical_path("/var/app/caches/x", StorageRoot::Documents, Some(data)),
            "var/app/caches/x"
        );
        assert_eq!(logical_path("/saves/1", StorageRoot::Documents, None), "saves/1");
    }
}
