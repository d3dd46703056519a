//! # Essay RAG CLI (`essay-rag`)
//!
//! ## Usage
//!
//! ```bash
//! essay-rag --config ./config/essay-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `essay-rag init` | Create the pgvector schema and search function |
//! | `essay-rag ingest <web\|filesystem>` | Fetch, chunk, embed and store essays |
//! | `essay-rag search "<query>"` | Show the passages a question would retrieve |
//! | `essay-rag ask "<question>"` | Answer one question with citations |
//! | `essay-rag chat` | Interactive multi-turn session |
//! | `essay-rag serve` | Start the HTTP chat API |
//!
//! ## Examples
//!
//! ```bash
//! # Create tables and the match function
//! essay-rag init
//!
//! # Ingest the first 20 essays from the configured site
//! essay-rag ingest web --limit 20
//!
//! # Ask with streaming output
//! essay-rag ask "How do you get startup ideas?" --stream
//!
//! # Serve the chat API
//! RUST_LOG=essay_rag=debug essay-rag serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use essay_rag::{ask, config, ingest, migrate, server};

/// Essay RAG: answer questions about an essay corpus, with citations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/essay-rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "essay-rag",
    about = "Retrieval-augmented question answering over an essay corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/essay-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector extension, tables, ledger and search function.
    ///
    /// Idempotent. Requires `index.provider = "pgvector"`.
    Init,

    /// Ingest essays from a source into the index.
    Ingest {
        /// `web` or `filesystem`.
        source: String,

        /// List what would be ingested without fetching or writing.
        #[arg(long)]
        dry_run: bool,

        /// Ingest at most this many pending essays.
        #[arg(long)]
        limit: Option<usize>,

        /// Forget processed URLs and re-ingest everything.
        #[arg(long)]
        full: bool,
    },

    /// Retrieve passages for a query without generating an answer.
    Search {
        query: String,

        /// Number of passages (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// JSON file with earlier messages (`[{"role": ..., "content": ...}]`).
        #[arg(long)]
        history: Option<PathBuf>,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Interactive chat session.
    Chat,

    /// Start the HTTP chat server on `server.bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            if cfg.index.provider != "pgvector" {
                anyhow::bail!("init requires index.provider = \"pgvector\"");
            }
            migrate::run_migrations(&cfg).await?;
            println!("Index schema initialized successfully.");
        }
        Commands::Ingest {
            source,
            dry_run,
            limit,
            full,
        } => {
            ingest::run_ingest(&cfg, &source, dry_run, full, limit).await?;
        }
        Commands::Search { query, k } => {
            ask::run_search(&cfg, &query, k).await?;
        }
        Commands::Ask {
            question,
            history,
            stream,
        } => {
            ask::run_ask(&cfg, &question, history.as_deref(), stream).await?;
        }
        Commands::Chat => {
            ask::run_chat(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
