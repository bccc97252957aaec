//! # Ticket Harness CLI (`tix`)
//!
//! ## Usage
//!
//! ```bash
//! tix --config ./config/tix.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tix unify` | Read every source file and write the normalized snapshot |
//! | `tix documents` | Build the documents file from the snapshot |
//! | `tix prepare` | `unify` and `documents` in one pass |
//! | `tix build` | Embed the documents and persist the index |
//! | `tix search "<query>"` | Print the most similar tickets |
//! | `tix recommend "<query>"` | Similar tickets plus a generated suggestion |
//! | `tix serve` | Start the HTTP query service |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ticket_harness::{config, embedding::Embedder, ingest, search, server};

/// Ticket Harness: semantic search over historical support tickets.
#[derive(Parser)]
#[command(
    name = "tix",
    about = "Ticket Harness: semantic search and recommendations over historical support tickets",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tix.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every ticket export in the input directory and write the unified snapshot.
    Unify {
        /// Override `[paths].input_dir`.
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Build the documents file from the unified snapshot.
    Documents,

    /// Run `unify` and `documents` in one pass.
    Prepare {
        /// Override `[paths].input_dir`.
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Embed every document and persist the index artifacts.
    ///
    /// Replaces any previous index at the configured paths.
    Build,

    /// Search the index for tickets similar to a query.
    Search {
        /// Free-text description of the incoming issue.
        query: String,

        /// Number of results (defaults to `retrieval.default_top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Print JSON instead of the human-readable listing.
        #[arg(long)]
        json: bool,
    },

    /// Search, then ask the text generator for a suggested approach.
    Recommend {
        query: String,

        #[arg(long)]
        k: Option<usize>,
    },

    /// Start the HTTP query service on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Unify { input } => {
            ingest::run_unify(&cfg, input.as_deref())?;
        }
        Commands::Documents => {
            ingest::run_documents(&cfg)?;
        }
        Commands::Prepare { input } => {
            ingest::run_prepare(&cfg, input.as_deref())?;
        }
        Commands::Build => {
            let embedder = Embedder::from_config(&cfg.embedding)?;
            ingest::run_build(&cfg, &embedder).await?;
        }
        Commands::Search { query, k, json } => {
            search::run_search(&cfg, &query, k, json).await?;
        }
        Commands::Recommend { query, k } => {
            search::run_recommend(&cfg, &query, k).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
