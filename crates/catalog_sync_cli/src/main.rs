//! Catalog Sync CLI
//!
//! Runs a catalog replica and helps operators debug the sync link.
//!
//! # Commands
//!
//! - `serve` - Run a replica: sync endpoints, outbox drain and peer pulls
//! - `sign` - Print the signature headers for a request body
//! - `health` - Check a peer's health endpoint

mod commands;

use catalog_sync_protocol::Origin;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Catalog replication between a local and a cloud replica.
#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replica until interrupted
    Serve {
        /// Address the sync endpoints listen on
        #[arg(short, long, env = "CATALOG_SYNC_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Base URL of the peer replica
        #[arg(short, long, env = "CATALOG_SYNC_PEER")]
        peer: String,

        /// Secret shared with the peer
        #[arg(short, long, env = "CATALOG_SYNC_SECRET", hide_env_values = true)]
        secret: String,

        /// Which replica this is (local, cloud)
        #[arg(short, long, env = "CATALOG_SYNC_ORIGIN", default_value = "local")]
        origin: Origin,

        /// Outbox journal file
        #[arg(long, env = "CATALOG_SYNC_OUTBOX", default_value = "outbox.jsonl")]
        outbox: PathBuf,

        /// Entity kind replicated
        #[arg(long, default_value = "product")]
        entity_kind: String,

        /// Seconds between pulls from the peer
        #[arg(long, default_value = "30")]
        pull_interval: u64,

        /// JSON array of entities to record as local writes at startup
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Print signature headers for a request body
    Sign {
        /// Secret shared with the peer
        #[arg(short, long, env = "CATALOG_SYNC_SECRET", hide_env_values = true)]
        secret: String,

        /// Body to sign; for pulls, the query string (default: stdin)
        #[arg(short, long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the body from this file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Signing time in unix milliseconds (default: now)
        #[arg(short, long)]
        timestamp: Option<i64>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check a peer's health endpoint
    Health {
        /// Base URL of the peer replica
        #[arg(short, long, env = "CATALOG_SYNC_PEER")]
        peer: String,

        /// Request timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            peer,
            secret,
            origin,
            outbox,
            entity_kind,
            pull_interval,
            seed,
        } => {
            commands::serve::run(commands::serve::ServeOptions {
                bind,
                peer,
                secret,
                origin,
                outbox,
                entity_kind,
                pull_interval: Duration::from_secs(pull_interval),
                seed,
            })?;
        }
        Commands::Sign {
            secret,
            body,
            file,
            timestamp,
            format,
        } => {
            commands::sign::run(&secret, body, file.as_deref(), timestamp, &format)?;
        }
        Commands::Health {
            peer,
            timeout,
            format,
        } => {
            commands::health::run(&peer, Duration::from_secs(timeout), &format)?;
        }
        Commands::Version => {
            println!("catalog-sync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
