//! # docindex CLI
//!
//! ## Usage
//!
//! ```bash
//! docindex --config ./config/docindex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docindex init` | Create the SQLite database and run schema migrations |
//! | `docindex repos` | List repositories with document and vector counts |
//! | `docindex ingest <repo> <TEXT>` | Index a document (or `--file <path>`) |
//! | `docindex get <id>` | Show a document and its indexing status |
//! | `docindex list <repo>` | Page through a repository's documents |
//! | `docindex delete <repo> <id>` | Remove a document and its vectors |
//! | `docindex search <repo> "<query>"` | Similarity search |
//! | `docindex reconcile` | Resume documents stuck mid-pipeline |
//!
//! ## Examples
//!
//! ```bash
//! docindex init
//! docindex ingest docs "the quick brown fox" --meta lang=en
//! docindex search docs "quick fox" --top-k 1
//! docindex reconcile --watch
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use docindex::commands::{self, parse_key_val};
use docindex::{config, logging, migrate};
use docindex_core::models::Page;

/// docindex: a document-to-vector indexing service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docindex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docindex",
    about = "docindex: index documents as embeddings and search them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docindex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List repositories and their document and vector counts.
    Repos,

    /// Ingest one document into a repository.
    Ingest {
        repository: String,

        /// Document text. Mutually exclusive with `--file`.
        text: Option<String>,

        /// Read the document from a file.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Metadata entry, repeatable: `--meta lang=en --meta team=infra`.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Show a document by id.
    Get { id: String },

    /// List documents of a repository.
    List {
        repository: String,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Delete a document and all of its vector entries.
    Delete { repository: String, id: String },

    /// Search a repository by similarity.
    Search {
        repository: String,

        query: String,

        /// Number of documents to return. Defaults to `[retrieval] default_top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Metadata equality filter, repeatable.
        #[arg(long = "filter", value_parser = parse_key_val)]
        filter: Vec<(String, String)>,
    },

    /// Resume documents left mid-pipeline.
    Reconcile {
        /// Keep running on the configured interval until Ctrl+C.
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Repos => {
            commands::run_repos(&cfg).await?;
        }
        Commands::Ingest {
            repository,
            text,
            file,
            meta,
        } => {
            commands::run_ingest(&cfg, &repository, text, file.as_deref(), meta).await?;
        }
        Commands::Get { id } => {
            commands::run_get(&cfg, &id).await?;
        }
        Commands::List {
            repository,
            offset,
            limit,
        } => {
            commands::run_list(&cfg, &repository, Page { offset, limit }).await?;
        }
        Commands::Delete { repository, id } => {
            commands::run_delete(&cfg, &repository, &id).await?;
        }
        Commands::Search {
            repository,
            query,
            top_k,
            filter,
        } => {
            commands::run_search(&cfg, &repository, &query, top_k, filter).await?;
        }
        Commands::Reconcile { watch } => {
            commands::run_reconcile(&cfg, watch).await?;
        }
    }

    Ok(())
}
