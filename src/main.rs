//! # Coreader CLI (`coreader`)
//!
//! The `coreader` binary is the primary interface for the reading
//! companion. It provides commands for building the index snapshot,
//! asking questions from the terminal, inspecting section spans, and
//! starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! coreader --config ./coreader.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coreader index` | Chunk the book, embed passages, write the snapshot |
//! | `coreader ask "<question>"` | Answer a question strictly from the book |
//! | `coreader sections` | List sections with their sequence spans |
//! | `coreader serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use coreader::answer::{answer, AnswerContext};
use coreader::config::load_config;
use coreader::guard::Vocabulary;
use coreader::journal::DialogJournal;
use coreader::pipeline::{load_index, rebuild_index};
use coreader::providers::{create_embedding_provider, GenerationProvider, OpenAiProvider};
use coreader::retriever::RankingRules;
use coreader::server::run_server;

/// Coreader — a local-first reading companion that answers strictly
/// from the book and respects the reader's position in it.
#[derive(Parser)]
#[command(
    name = "coreader",
    about = "Coreader — a spoiler-safe, citation-first reading companion",
    version,
    long_about = "Coreader chunks a Markdown book into anchored passages, embeds them into a \
    JSON snapshot index, and answers questions with verbatim citations. A narrative-position \
    guard refuses questions about parts of the book the reader has not reached yet."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// All data paths, embedding, session, and server settings are read
    /// from this file. See `config/coreader.example.toml`.
    #[arg(long, global = true, default_value = "./coreader.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the index snapshot from the book directory.
    ///
    /// Chunks every Markdown file into paragraph passages, embeds them
    /// with the configured provider, and atomically replaces the JSON
    /// snapshot. Safe to re-run at any time.
    Index,

    /// Ask a question and print the reply with its citations.
    Ask {
        /// The question, phrased in the language of the book.
        message: String,

        /// One-off reading boundary (inclusive sequence number),
        /// overriding the session setting for this question only.
        #[arg(long)]
        boundary: Option<u64>,
    },

    /// List indexed sections with their sequence spans.
    ///
    /// Useful for picking a reading boundary without raw numbers.
    Sections,

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Index => {
            let provider = create_embedding_provider(
                &config.embedding,
                &config.generation,
                config.session.offline,
            )?;
            let store = rebuild_index(&config, provider.as_ref()).await?;
            println!("Indexed {} passages.", store.all().len());
        }
        Commands::Ask { message, boundary } => {
            let provider = create_embedding_provider(
                &config.embedding,
                &config.generation,
                config.session.offline,
            )?;
            let generation: Option<Box<dyn GenerationProvider>> =
                if config.embedding.provider == "openai" && std::env::var("OPENAI_API_KEY").is_ok()
                {
                    Some(Box::new(OpenAiProvider::new(
                        &config.embedding,
                        &config.generation,
                        config.session.offline,
                    )?))
                } else {
                    None
                };
            let vocabulary = Vocabulary::symposium();
            let rules = RankingRules::symposium();
            let journal = DialogJournal::new(&config.data.journal_dir);
            let ctx = AnswerContext {
                config: &config,
                session: &config.session,
                embeddings: provider.as_ref(),
                generation: generation.as_deref(),
                vocabulary: &vocabulary,
                rules: &rules,
                journal: Some(&journal),
            };
            let outcome = answer(&ctx, &message, boundary).await;
            println!("{}", outcome.reply);
            for (i, c) in outcome.citations.iter().enumerate() {
                println!("  [{}] {} ({}#{})", i + 1, c.section_title, c.source_file, c.anchor);
            }
        }
        Commands::Sections => {
            let store = load_index(&config)?;
            if store.is_empty() {
                println!("Index is empty. Run `coreader index` first.");
            } else {
                for section in coreader::server::section_spans(store.all()) {
                    println!(
                        "{}  (seq {}..{}, {} passages)",
                        section.title, section.min_seq, section.max_seq, section.count
                    );
                }
            }
        }
        Commands::Serve => {
            run_server(&config).await?;
        }
    }

    Ok(())
}
