//! Delete command implementation.

use crate::document::JsonDocument;
use crate::session::Session;

/// Runs the delete command.
pub async fn run(session: &Session, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let key = session.key(path);
    let tombstone = JsonDocument::empty();
    let removed = if session.compressed() {
        session.engine.delete_compressed(&tombstone, &key)?
    } else {
        session.engine.delete(&tombstone, &key)?
    };
    session.engine.wait_idle().await;

    let pending = session
        .engine
        .known_record(&key)
        .map_or(false, |record| record.pending_save);
    let local = if removed { "removed" } else { "no local copy" };
    let remote = if pending { "tombstone pending" } else { "tombstone written" };
    println!("Deleted {}: {local}, {remote}", key.id());
    Ok(())
}
