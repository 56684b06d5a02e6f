//! recordsync CLI
//!
//! Syncs JSON documents between local data directories through a shared
//! remote directory.
//!
//! # Commands
//!
//! - `save` - Write a document locally and push it
//! - `load` - Load a document, reconciling with the remote copy
//! - `delete` - Delete a document and push a tombstone
//! - `ledger` - List the known-records ledger
//! - `watch` - Print remote changes under a path or folder

mod commands;
mod document;
mod remote;
mod session;

use clap::{Parser, Subcommand};
use commands::Format;
use recordsync_protocol::StorageRoot;
use session::{Session, SessionOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// recordsync command-line document sync.
#[derive(Parser)]
#[command(name = "recordsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local data directory
    #[arg(global = true, short, long, default_value = "recordsync-data")]
    data: PathBuf,

    /// Shared remote directory
    #[arg(global = true, short, long)]
    remote: Option<PathBuf>,

    /// Remote namespace
    #[arg(global = true, short, long, default_value = "recordsync")]
    namespace: String,

    /// Storage root (application-support, documents, caches, custom-N)
    #[arg(global = true, long, default_value = "documents", value_parser = session::parse_root)]
    root: StorageRoot,

    /// Store local files compressed
    #[arg(global = true, short, long)]
    compressed: bool,

    /// Merge JSON objects on conflict instead of picking a revision
    #[arg(global = true, short, long)]
    merge: bool,

    /// Reject remote payloads above this many bytes (spills to blobs)
    #[arg(global = true, long)]
    max_inline: Option<usize>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a document locally and push it
    Save {
        /// Logical path of the document
        path: String,

        /// JSON body
        body: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Load a document, reconciling with the remote copy
    Load {
        /// Logical path of the document
        path: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete a document and push a tombstone
    Delete {
        /// Logical path of the document
        path: String,
    },

    /// List the known-records ledger
    Ledger {
        /// Only show entries waiting to be pushed
        #[arg(short, long)]
        pending: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print remote changes under a path or folder (end folders with '/')
    Watch {
        /// Logical path or folder pattern
        pattern: String,

        /// Poll interval in milliseconds
        #[arg(short, long, default_value = "2000")]
        interval: u64,

        /// Stop after this many polls
        #[arg(long)]
        rounds: Option<u64>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("recordsync CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let remote = cli.remote.ok_or("Remote directory required (--remote)")?;
    let options = SessionOptions {
        data: cli.data,
        remote,
        namespace: cli.namespace,
        root: cli.root,
        compressed: cli.compressed,
        merge: cli.merge,
        max_inline: cli.max_inline,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let session = Session::open(options)?;
        match cli.command {
            Commands::Save { path, body, format } => {
                commands::save::run(&session, &path, &body, Format::parse(&format)).await?;
            }
            Commands::Load { path, format } => {
                commands::load::run(&session, &path, Format::parse(&format)).await?;
            }
            Commands::Delete { path } => {
                commands::delete::run(&session, &path).await?;
            }
            Commands::Ledger { pending, format } => {
                commands::ledger::run(&session, pending, Format::parse(&format)).await?;
            }
            Commands::Watch {
                pattern,
                interval,
                rounds,
            } => {
                let interval = Duration::from_millis(interval.max(1));
                commands::watch::run(&session, &pattern, interval, rounds).await?;
            }
            Commands::Version => {}
        }
        session.close().await
    })
}
