//! CLI command implementations.

pub mod delete;
pub mod ledger;
pub mod load;
pub mod save;
pub mod watch;

use crate::document::JsonDocument;
use crate::session::Session;
use parking_lot::Mutex;
use recordsync_protocol::RecordKey;
use std::sync::Arc;

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl Format {
    /// Parses a `--format` value; anything but `json` is text.
    pub fn parse(name: &str) -> Self {
        match name {
            "json" => Format::Json,
            _ => Format::Text,
        }
    }
}

/// Loads `key` and waits for reconciliation; returns every delivery in order.
pub(crate) async fn load_all(
    session: &Session,
    key: &RecordKey,
) -> Result<Vec<(Option<JsonDocument>, bool)>, Box<dyn std::error::Error>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let on_loaded = move |value: Option<JsonDocument>, from_remote: bool| {
        sink.lock().push((value, from_remote));
    };
    if session.compressed() {
        session
            .engine
            .load_compressed(key, Arc::clone(&session.policy), on_loaded)?;
    } else {
        session.engine.load(key, Arc::clone(&session.policy), on_loaded)?;
    }
    session.engine.wait_idle().await;
    let deliveries = std::mem::take(&mut *seen.lock());
    Ok(deliveries)
}
