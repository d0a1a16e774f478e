//! # QA Harness CLI (`qah`)
//!
//! Builds a knowledge base from project documentation and generates
//! grounded test cases and browser-automation scripts from it.
//!
//! ## Usage
//!
//! ```bash
//! qah --config ./config/qah.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qah build <paths…>` | Rebuild the knowledge base from files and directories |
//! | `qah status` | Show whether a knowledge base exists and how it was built |
//! | `qah search "<query>"` | Show the top-k chunks for a query |
//! | `qah generate cases "<requirement>"` | Generate test cases as a JSON list |
//! | `qah generate script --test-case <file|text> --markup <file>` | Generate a Selenium script |
//! | `qah serve` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! qah build ./docs ./checkout.html
//! qah search "discount code behavior" --k 2
//! qah generate cases "Discount codes at checkout" > cases.json
//! qah generate script --test-case tc1.json --markup ./checkout.html > test_tc1.py
//! ```
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=qa_harness=debug`
//! for per-batch detail.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use qa_harness::{config, generate, ingest, retrieve, server};

/// QA Harness CLI: retrieval-grounded test-case and script generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/qah.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "qah",
    about = "QA Harness — generate grounded test cases and scripts from project documentation",
    version,
    long_about = "QA Harness loads mixed-format documentation (text, markdown, JSON, HTML), \
    chunks and embeds it into a persistent index, and uses retrieved context to prompt a \
    language model for test cases and Selenium scripts that cite their sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/qah.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the knowledge base.
    ///
    /// Loads every supported file (directories are walked recursively),
    /// chunks and embeds them, and replaces the persisted index. Files that
    /// fail to load are reported and skipped.
    Build {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Load and chunk only; report counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show knowledge-base status.
    Status,

    /// Show the chunks retrieved for a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `retrieval.test_case_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Generate test artifacts.
    Generate {
        #[command(subcommand)]
        task: GenerateTask,
    },

    /// Start the JSON HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum GenerateTask {
    /// Generate a JSON list of test cases for a requirement.
    Cases {
        /// Requirement or feature description.
        requirement: String,
    },

    /// Generate a standalone Selenium script for one test case.
    Script {
        /// Test case as text or JSON, or a path to a file containing it.
        #[arg(long)]
        test_case: String,

        /// HTML document of the page under test.
        #[arg(long)]
        markup: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { paths, dry_run } => {
            ingest::run_build(&cfg, &paths, dry_run).await?;
        }
        Commands::Status => {
            ingest::run_status(&cfg).await?;
        }
        Commands::Search { query, k } => {
            retrieve::run_search(&cfg, &query, k).await?;
        }
        Commands::Generate { task } => match task {
            GenerateTask::Cases { requirement } => {
                generate::run_generate_cases(&cfg, &requirement).await?;
            }
            GenerateTask::Script { test_case, markup } => {
                generate::run_generate_script(&cfg, &test_case, &markup).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
