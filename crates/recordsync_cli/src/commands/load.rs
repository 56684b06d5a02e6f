//! Load command implementation.

use super::{load_all, Format};
use crate::document::JsonDocument;
use crate::session::Session;
use serde::Serialize;

/// Load result.
#[derive(Debug, Serialize)]
pub struct LoadResult {
    /// Record key id.
    pub key: String,
    /// Number of callback deliveries.
    pub deliveries: usize,
    /// The authoritative value, `None` if absent or deleted.
    pub value: Option<JsonDocument>,
    /// Whether the authoritative value came from the remote side.
    pub from_remote: bool,
}

/// Runs the load command.
pub async fn run(
    session: &Session,
    path: &str,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = session.key(path);
    let deliveries = load_all(session, &key).await?;
    let count = deliveries.len();
    let (value, from_remote) = deliveries.into_iter().last().unwrap_or((None, false));

    let result = LoadResult {
        key: key.id().to_string(),
        deliveries: count,
        value,
        from_remote,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => match &result.value {
            Some(doc) => {
                let source = if result.from_remote { "remote" } else { "local" };
                println!("{} (revision {}, {source})", result.key, doc.revision);
                println!("{}", serde_json::to_string_pretty(&doc.body)?);
            }
            None if result.deliveries > 0 => println!("{} was deleted remotely", result.key),
            None => println!("{} not found", result.key),
        },
    }
    Ok(())
}
