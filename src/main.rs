//! # docqa CLI
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ingest <path>` | Parse one file and print its ingestion envelope as JSON |
//! | `docqa chunk <path>` | Parse and chunk one file, print the chunks |
//! | `docqa index build` | Build the index if absent, otherwise reuse it |
//! | `docqa index rebuild` | Delete and rebuild the index |
//! | `docqa index status` | Show index state, manifest and documents |
//! | `docqa query "<text>"` | Print the top-k chunks with scores |
//! | `docqa ask "<question>"` | Retrieve context and generate an answer |
//! | `docqa evaluate <cases.toml>` | Run keyword-based answer checks |
//!
//! Logging goes to stderr and is controlled by `DOCQA_LOG`
//! (an `EnvFilter` directive, default `warn`).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::commands;
use docqa::config;
use docqa::progress::ProgressMode;

/// docqa: ask questions about a folder of documents.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa: local document question answering (parse, chunk, embed, retrieve, generate)",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    /// Build progress on stderr. Defaults to `human` on a TTY, `off` otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse one file and print the ingestion envelope as JSON.
    Ingest {
        /// File to ingest (.pdf, .docx, .csv, .pptx, .txt, .md).
        path: PathBuf,
    },

    /// Parse and chunk one file without touching the index.
    Chunk {
        path: PathBuf,
    },

    /// Manage the on-disk vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Retrieve the chunks most similar to a query.
    Query {
        /// The query text.
        text: String,

        /// Number of chunks to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Number of context chunks (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Ask every case in a TOML file and report keyword accuracy.
    Evaluate {
        /// Cases file with `[[case]]` tables.
        cases: PathBuf,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Build the index if it does not exist; otherwise reuse it.
    Build,
    /// Delete the index and build it again from the current documents.
    Rebuild,
    /// Show index state, manifest and per-document counts.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DOCQA_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;
    let reporter = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Ingest { path } => {
            commands::run_ingest(&cfg, &path)?;
        }
        Commands::Chunk { path } => {
            commands::run_chunk(&cfg, &path)?;
        }
        Commands::Index { action } => match action {
            IndexAction::Build => {
                commands::run_index_build(cfg, reporter.as_ref()).await?;
            }
            IndexAction::Rebuild => {
                commands::run_index_rebuild(&cfg, reporter.as_ref()).await?;
            }
            IndexAction::Status => {
                commands::run_index_status(&cfg).await?;
            }
        },
        Commands::Query { text, k } => {
            commands::run_query(cfg, &text, k, reporter.as_ref()).await?;
        }
        Commands::Ask { question, k } => {
            commands::run_ask(cfg, &question, k, reporter.as_ref()).await?;
        }
        Commands::Evaluate { cases } => {
            commands::run_evaluate(cfg, &cases, reporter.as_ref()).await?;
        }
    }

    Ok(())
}
