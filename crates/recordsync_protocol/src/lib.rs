//! # recordsync Protocol
//!
//! Record model and policy contracts shared by every recordsync crate.
//!
//! This crate provides:
//! - [`RecordKey`] derivation from a logical path and a [`StorageRoot`]
//! - The remote record model ([`RemoteSnapshot`], [`RecordDraft`], [`VersionToken`])
//! - The remote failure taxonomy ([`RemoteError`], [`ErrorClass`])
//! - The [`Syncable`] value contract and the [`SyncPolicy`] capability
//! - Inbound push-notification payloads ([`RemoteNotification`])
//!
//! This is a pure model crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binary;
mod error;
mod key;
mod notification;
mod policy;
mod record;
mod remote_error;
mod syncable;

pub use binary::{BinaryFile, BinaryPolicy};
pub use error::{CodecError, CodecResult};
pub use key::{RecordKey, StorageRoot, MAX_KEY_PATH_LEN, PATH_SEPARATOR};
pub use notification::RemoteNotification;
pub use policy::{Decision, FnPolicy, NeverOverwrite, Ordered, SyncPolicy};
pub use record::{BlobRef, Payload, RecordDraft, RecordVersion, RemoteSnapshot, VersionToken};
pub use remote_error::{ErrorClass, FatalKind, RemoteError, RemoteResult};
pub use syncable::{cbor_decode, cbor_encode, Syncable};
