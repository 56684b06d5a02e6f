//! Payload compression.
//!
//! zstd with magic-bytes detection, so callers can tell compressed payloads
//! from plain ones without out-of-band metadata.

use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

/// Zstd frame magic (little-endian 0xFD2FB528).
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// File-name suffix marking a compressed local file.
pub const COMPRESSED_SUFFIX: &str = "zst";

/// zstd compressor with a fixed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compressor {
    level: i32,
}

impl Compressor {
    /// Creates a compressor. Levels outside 1..=22 are clamped.
    #[must_use]
    pub fn new(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }

    /// Configured level.
    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Returns true if `data` starts with a zstd frame header.
    #[inline]
    #[must_use]
    pub fn is_compressed(data: &[u8]) -> bool {
        data.len() >= 4 && data[..4] == ZSTD_MAGIC
    }

    /// Compresses `data`.
    pub fn compress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| StorageError::Compression(e.to_string()))
    }

    /// Decompresses a zstd frame.
    ///
    /// # Errors
    ///
    /// Returns `Compression` if `data` is not a valid zstd frame.
    pub fn decompress(&self, data: &[u8]) -> StorageResult<Vec<u8>> {
        if !Self::is_compressed(data) {
            return Err(StorageError::Compression("missing zstd frame header".into()));
        }
        zstd::decode_all(data).map_err(|e| StorageError::Compression(e.to_string()))
    }

    /// Appends [`COMPRESSED_SUFFIX`] to the file name unless it is already there.
    #[must_use]
    pub fn suffixed(path: &Path) -> PathBuf {
        let already = path
            .extension()
            .map_or(false, |ext| ext == COMPRESSED_SUFFIX);
        if already {
            return path.to_path_buf();
        }
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(COMPRESSED_SUFFIX);
        PathBuf::from(name)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compressed_has_magic() {
        let c = Compressor::default();
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".repeat(10);
        let packed = c.compress(&data).unwrap();
        assert!(Compressor::is_compressed(&packed));
        assert!(packed.len() < data.len());
        assert_eq!(c.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn plain_data_rejected() {
        let c = Compressor::default();
        assert!(!Compressor::is_compressed(b"{\"v\":1}"));
        assert!(c.decompress(b"{\"v\":1}").is_err());
        assert!(c.decompress(&ZSTD_MAGIC).is_err());
    }

    #[test]
    fn suffix_added_once() {
        assert_eq!(
            Compressor::suffixed(Path::new("saves/slot1.json")),
            PathBuf::from("saves/slot1.json.zst")
        );
        assert_eq!(
            Compressor::suffixed(Path::new("saves/slot1.zst")),
            PathBuf::from("saves/slot1.zst")
        );
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(Compressor::new(0).level(), 1);
        assert_eq!(Compressor::new(99).level(), 22);
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_survive(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let c = Compressor::default();
            let packed = c.compress(&data).unwrap();
            prop_assert_eq!(c.decompress(&packed).unwrap(), data);
        }
    }
}
