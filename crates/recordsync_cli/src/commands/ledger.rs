//! Ledger command implementation.

use super::Format;
use crate::session::Session;
use serde::Serialize;

/// One ledger entry as printed.
#[derive(Debug, Serialize)]
pub struct LedgerEntry {
    /// Record key id.
    pub key: String,
    /// Logical path.
    pub path: String,
    /// Storage root folder name.
    pub root: String,
    /// Last known remote version, empty if never fetched.
    pub version: String,
    /// A local change is waiting to be pushed.
    pub pending: bool,
    /// The record is deleted.
    pub deleted: bool,
    /// Value type tag.
    pub type_tag: String,
    /// The local file is compressed.
    pub compressed: bool,
}

/// Runs the ledger command.
pub async fn run(
    session: &Session,
    pending_only: bool,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries: Vec<LedgerEntry> = session
        .engine
        .known_records()
        .into_iter()
        .filter(|record| !pending_only || record.pending_save)
        .map(|record| LedgerEntry {
            key: record.key.id().to_string(),
            path: record.key.path().to_string(),
            root: record.key.root().dir_name(),
            version: record.version.as_str().to_string(),
            pending: record.pending_save,
            deleted: record.deleted,
            type_tag: record.type_tag,
            compressed: record.compressed,
        })
        .collect();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => {
            println!("Known records: {}", entries.len());
            for entry in &entries {
                let mut flags = Vec::new();
                if entry.pending {
                    flags.push("pending");
                }
                if entry.deleted {
                    flags.push("deleted");
                }
                if entry.compressed {
                    flags.push("compressed");
                }
                let version = if entry.version.is_empty() { "-" } else { &entry.version };
                println!(
                    "  {} [{}] {} {}",
                    entry.key,
                    entry.type_tag,
                    version,
                    flags.join(",")
                );
            }
        }
    }
    Ok(())
}
