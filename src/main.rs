//! # Lore Harness CLI (`lore`)
//!
//! The `lore` binary ingests a novel corpus and answers questions about it.
//!
//! ## Usage
//!
//! ```bash
//! lore --config ./config/lore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the SQLite database and run schema migrations |
//! | `lore ingest [PATH]` | Chunk, embed and index the corpus (or one file) |
//! | `lore status` | Show registry records and index size |
//! | `lore search "<query>"` | Print the nearest passages |
//! | `lore ask "<question>"` | Answer one question through the agent |
//! | `lore chat` | Interactive session |
//!
//! Logs go to stderr. Set `LORE_LOG` (or `RUST_LOG`) to a tracing filter
//! such as `lore_harness=debug`, or pass `--verbose`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lore_harness::{chat, config, ingest, migrate, search, status};

/// Lore Harness CLI, a retrieval-augmented agent over a multi-volume corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lore.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lore",
    about = "Lore Harness: ask questions about a multi-volume novel corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lore.toml")]
    config: PathBuf,

    /// Log debug events to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the `index_entries` and `registry`
    /// tables. Safe to run repeatedly.
    Init,

    /// Ingest the corpus, or a single file or directory.
    ///
    /// Unchanged documents that are already embedded are skipped. Failed
    /// documents are reported and retried on the next run.
    Ingest {
        /// File or directory to ingest. Defaults to `[corpus].root`.
        path: Option<PathBuf>,

        /// Re-embed even when the content is unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Show ingestion status per document and the index size.
    Status,

    /// Print the passages nearest to a query.
    Search {
        query: String,

        /// Number of passages (defaults to `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,

        /// Only passages from this volume, e.g. `"Volume 2"` or `V2`.
        #[arg(long)]
        volume: Option<String>,
    },

    /// Answer one question.
    ///
    /// Memory lives in the process, so each `ask` starts a fresh
    /// conversation. Use `chat` for follow-up questions.
    Ask {
        question: String,

        /// Direct retrieval only, no tool routing.
        #[arg(long)]
        simple: bool,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Start an interactive chat.
    Chat {
        #[arg(long, default_value = "default")]
        session: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("LORE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path, force } => {
            ingest::run_ingest(&cfg, path.as_deref(), force).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Search { query, k, volume } => {
            search::run_search(&cfg, &query, k, volume.as_deref()).await?;
        }
        Commands::Ask {
            question,
            simple,
            stream,
        } => {
            chat::run_ask(&cfg, &question, simple, stream).await?;
        }
        Commands::Chat { session } => {
            chat::run_chat(&cfg, &session).await?;
        }
    }

    Ok(())
}
