//! The value contract for synced items.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::SystemTime;

/// A caller-supplied value that can be kept in sync.
///
/// The default encoding is CBOR via serde. Types with their own wire format
/// override [`Syncable::encode`] and [`Syncable::decode`]; types whose local
/// file differs from the remote payload (see [`crate::BinaryFile`]) also
/// override the `_local` pair.
///
/// # Example
///
/// ```
/// use recordsync_protocol::Syncable;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
/// struct Settings { volume: u8 }
///
/// impl Syncable for Settings {}
///
/// let bytes = Settings { volume: 3 }.encode().unwrap();
/// assert_eq!(Settings::decode(&bytes).unwrap(), Settings { volume: 3 });
/// ```
pub trait Syncable: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Tag stored with every remote record of this type.
    ///
    /// Defaults to the full type path, so two types that share a name in
    /// different modules never share a tag. Override it to keep records
    /// readable across renames.
    fn type_tag() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Encodes the value for the remote store.
    fn encode(&self) -> CodecResult<Vec<u8>> {
        cbor_encode(self)
    }

    /// Decodes a value received from the remote store.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        cbor_decode(bytes)
    }

    /// Encodes the value for its local file.
    fn encode_local(&self) -> CodecResult<Vec<u8>> {
        self.encode()
    }

    /// Decodes a local file. `modified` is the file's modification time.
    fn decode_local(bytes: &[u8], modified: Option<SystemTime>) -> CodecResult<Self> {
        let _ = modified;
        Self::decode(bytes)
    }
}

/// Encodes any serde value as CBOR.
pub fn cbor_encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(CodecError::encode)?;
    Ok(out)
}

/// Decodes a CBOR value.
pub fn cbor_decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(CodecError::decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
    struct Score {
        v: u32,
    }

    impl Syncable for Score {}

    mod other {
        use serde::{Deserialize, Serialize};

        #[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
        pub struct Score {
            pub v: u32,
        }

        impl crate::Syncable for Score {}
    }

    #[test]
    fn default_type_tag_is_full_path() {
        assert!(Score::type_tag().ends_with("::Score"));
        assert!(Score::type_tag().starts_with("recordsync_protocol::"));
        assert_ne!(Score::type_tag(), other::Score::type_tag());
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(Score::decode(&[0xff, 0x00, 0x13]).is_err());
    }

    #[test]
    fn local_form_defaults_to_remote_form() {
        let score = Score { v: 9 };
        assert_eq!(score.encode_local().unwrap(), score.encode().unwrap());
        let bytes = score.encode_local().unwrap();
        assert_eq!(Score::decode_local(&bytes, None).unwrap(), score);
    }
}
