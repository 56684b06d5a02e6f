//! Save command implementation.

use super::{load_all, Format};
use crate::document::JsonDocument;
use crate::session::Session;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Save result.
#[derive(Debug, Serialize)]
pub struct SaveResult {
    /// Record key id.
    pub key: String,
    /// Bytes written to the local file.
    pub local_bytes: usize,
    /// Revision that was saved.
    pub saved_revision: u64,
    /// The value both sides converged on, if the push completed.
    pub final_value: Option<JsonDocument>,
    /// The change still has to reach the remote directory.
    pub pending: bool,
}

/// Runs the save command.
///
/// The current value is reconciled first so the new revision supersedes it.
pub async fn run(
    session: &Session,
    path: &str,
    body: &str,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let body: Value = serde_json::from_str(body)?;
    let key = session.key(path);

    let current = load_all(session, &key)
        .await?
        .into_iter()
        .last()
        .and_then(|(value, _)| value);
    let revision = current.map_or(1, |doc| doc.revision + 1);
    let doc = JsonDocument::new(revision, body);

    let final_value = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&final_value);
    let on_final = move |value: JsonDocument| *sink.lock() = Some(value);
    let policy = Arc::clone(&session.policy);
    let written = if session.compressed() {
        session.engine.save_compressed(&doc, &key, policy, on_final)?
    } else {
        session.engine.save(&doc, &key, policy, on_final)?
    };
    session.engine.wait_idle().await;

    let result = SaveResult {
        key: key.id().to_string(),
        local_bytes: written.len(),
        saved_revision: revision,
        final_value: final_value.lock().take(),
        pending: session
            .engine
            .known_record(&key)
            .map_or(false, |record| record.pending_save),
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => {
            println!("Saved {} (revision {})", result.key, result.saved_revision);
            println!("  Local bytes: {}", result.local_bytes);
            match &result.final_value {
                Some(value) if value.revision != revision => {
                    println!("  Converged on revision {}", value.revision);
                    println!("  {}", value.body);
                }
                Some(_) => println!("  Pushed"),
                None if result.pending => println!("  Pending (remote unavailable)"),
                None => println!("  Not pushed"),
            }
        }
    }
    Ok(())
}
