//! Watch command implementation.
//!
//! The directory remote has no push channel, so the watcher polls: every
//! interval it raises an unspecific change notification, which rescans all
//! observers.

use crate::document::JsonDocument;
use crate::session::Session;
use recordsync_engine::{ChangeItem, Liveness};
use recordsync_protocol::RemoteNotification;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Runs the watch command until interrupted or `rounds` polls have run.
pub async fn run(
    session: &Session,
    pattern: &str,
    interval: Duration,
    rounds: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pattern = session.key(pattern);
    let id = session.engine.observe_typed(
        &pattern,
        Liveness::Always,
        Arc::clone(&session.policy),
        |item: ChangeItem<JsonDocument>| match &item.value {
            Some(doc) => println!("changed {} (revision {}): {}", item.path, doc.revision, doc.body),
            None => println!("deleted {}", item.path),
        },
    )?;
    info!(observer = %id, pattern = %pattern, "watching");

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut polls = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        session.engine.notify(&RemoteNotification::empty());
        session.engine.wait_idle().await;
        polls += 1;
        if rounds.map_or(false, |limit| polls >= limit) {
            break;
        }
    }

    session.engine.remove_observer(id);
    Ok(())
}
