//! # recordsync Engine
//!
//! Keeps typed local files in sync with a remote record store.
//!
//! This crate provides:
//! - The [`SyncEngine`] context object (save, load, delete, observe)
//! - The persistent ledger of known remote versions ([`LocalKnownRecords`])
//! - Reachability tracking and deferred retries ([`RetryScheduler`])
//! - Remote error classification with back-off, blob spill and kill switch
//! - Debounced, batched fetching with a single network lane
//! - Reconciliation planning over the policy's decisions ([`plan_load`], [`plan_push`])
//! - The [`RemoteStore`] transport seam and an in-memory double
//!
//! ## Architecture
//!
//! Local writes are **synchronous and never wait on the network**. The remote
//! side converges in the background:
//! 1. Save writes the local file and marks the ledger entry pending
//! 2. A per-key push fetches the current remote record and its version
//! 3. The sync policy decides between pushing, merging and keeping remote
//! 4. The write is conditional on the fetched version; a conflict refetches
//! 5. The confirmed version clears the pending flag
//!
//! ## Key Invariants
//!
//! - A remote write never succeeds against a version token it did not fetch
//! - At most one push per key runs at a time, in arrival order
//! - Pending work survives restarts through the ledger
//! - User callbacks run one at a time on a single callback context

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod callback;
mod client;
mod config;
mod engine;
mod error;
mod ledger;
mod observer;
mod paths;
mod reconcile;
mod scheduler;
mod stats;
mod transport;
mod worker;

pub use config::{RetryConfig, SyncConfig, DEFAULT_LEDGER_PATH};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use ledger::{KnownRecord, LocalKnownRecords};
pub use observer::{ChangeItem, ChangedItem, Liveness, ObserverId};
pub use paths::{local_path, logical_path};
pub use reconcile::{plan_load, plan_push, resolve, LoadAction, PushPlan, RemoteState, Resolution};
pub use scheduler::{Reachability, RetryScheduler};
pub use stats::SyncStats;
pub use transport::{MemoryRemoteStore, RemoteStore};
pub use worker::WorkerPool;
