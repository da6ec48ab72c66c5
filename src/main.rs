//! # Memory Vault CLI (`vault`)
//!
//! Grounded question answering over a private, pre-indexed knowledge base.
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault ask "<question>"` | Answer with validated `[chunk:<id>]` citations |
//! | `vault search "<query>"` | Show the context `ask` would use, with diagnostics |
//! | `vault get <id>` | Print one chunk |
//! | `vault stats` | Collection name and chunk count |
//! | `vault check` | Verify Ollama, the chat model, and the index |
//! | `vault serve` | Start the HTTP tool server |
//! | `vault config show` | Print the effective configuration |
//!
//! ## Examples
//!
//! ```bash
//! # Ask, allowing some uncited connective text
//! vault ask "How do window functions partition rows?" --lenient
//!
//! # Restrict retrieval to one source group and show the scoring log
//! vault search "docker volumes" --group docker --verbose
//!
//! # Serve tools for an agent
//! vault serve --config ./config/vault.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use memory_vault::ask::{run_ask, AskRequest};
use memory_vault::chroma::ChromaIndex;
use memory_vault::config;
use memory_vault::get::{run_get, ChunkFormat, GetChunk};
use memory_vault::logging;
use memory_vault::search::run_search;
use memory_vault::server::run_server;
use memory_vault::stats::{run_check, run_stats};
use memory_vault_core::validate::CoverageMode;

/// Memory Vault: grounded answers from your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file falls back to built-in defaults; environment
/// variables (`RAG_*`, `OLLAMA_*`, `VAULT_*`) override both.
#[derive(Parser)]
#[command(
    name = "vault",
    about = "Memory Vault: grounded question answering over a private knowledge base",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    /// Debug-level logging and the per-candidate scoring log.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the knowledge base.
    ///
    /// Every sentence or bullet must end with a `[chunk:<id>]` citation
    /// backed by quoted evidence. A rejected first answer is retried once;
    /// a second rejection prints a debug bundle and exits non-zero.
    Ask {
        question: String,

        /// Allow uncited connective text as long as some block is cited.
        #[arg(long)]
        lenient: bool,

        /// Restrict retrieval to one source group.
        #[arg(long)]
        group: Option<String>,

        /// Do not require quoted evidence in cited blocks.
        #[arg(long)]
        no_evidence: bool,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run retrieval only and show the resulting context.
    Search {
        query: String,

        /// Restrict retrieval to one source group.
        #[arg(long)]
        group: Option<String>,

        /// Print context and diagnostics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one chunk by id.
    Get {
        id: String,

        /// Truncate the body to this many characters (0 = no limit).
        #[arg(long, default_value_t = 5000)]
        max_chars: usize,

        #[arg(long, value_enum, default_value_t = ChunkFormat::Raw)]
        format: ChunkFormat,
    },

    /// Show collection statistics.
    Stats,

    /// Check that Ollama, the chat model, and the index are usable.
    Check,

    /// Start the HTTP tool server on `[server].bind`.
    Serve,

    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (file plus environment) as TOML.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask {
            question,
            lenient,
            group,
            no_evidence,
            json,
        } => {
            let request = AskRequest {
                question,
                mode: lenient.then_some(CoverageMode::Lenient),
                source_group: group,
                require_evidence: no_evidence.then_some(false),
            };
            run_ask(cfg, request, json).await?;
        }
        Commands::Search { query, group, json } => {
            let index = ChromaIndex::new(&cfg.index, &cfg.generation)?;
            run_search(&cfg, &index, &query, group.as_deref(), cli.verbose, json).await?;
        }
        Commands::Get {
            id,
            max_chars,
            format,
        } => {
            let index = ChromaIndex::new(&cfg.index, &cfg.generation)?;
            run_get(
                &index,
                &GetChunk {
                    id,
                    max_chars,
                    format,
                },
            )
            .await?;
        }
        Commands::Stats => {
            let index = ChromaIndex::new(&cfg.index, &cfg.generation)?;
            run_stats(&cfg, &index).await?;
        }
        Commands::Check => {
            let index = ChromaIndex::new(&cfg.index, &cfg.generation)?;
            run_check(&cfg, &index).await?;
        }
        Commands::Serve => {
            run_server(cfg).await?;
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", cfg.to_toml()?);
        }
    }

    Ok(())
}
