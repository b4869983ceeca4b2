//! # Kano Chunk CLI (`kano-chunk`)
//!
//! Command-line front end for the chunking engine. Every command reads an
//! optional TOML config (see [`kano_chunk::config`]) and builds one
//! [`Pipeline`] from it.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kano-chunk chunk <file>` | Chunk and budget a document |
//! | `kano-chunk count <file>` | Count tokens with the resolved tokenizer |
//! | `kano-chunk budget <file>` | Show the budget and trim the text to it |
//! | `kano-chunk diagnose` | Probe every adapter in the fallback chain |
//! | `kano-chunk stats <file>` | Chunk a document and print cache/degradation stats |
//!
//! ## Examples
//!
//! ```bash
//! kano-chunk --config ./kano-chunk.toml chunk docs/overview.md --json
//! kano-chunk -vv count notes.md
//! kano-chunk diagnose --model bert-base-uncased
//! kano-chunk diagnose --accuracy --cases my-cases.json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use kano_chunk::accuracy::{self, AccuracyValidator};
use kano_chunk::budget::TokenBudgetManager;
use kano_chunk::config::{self, Config};
use kano_chunk::diagnostics;
use kano_chunk::error::TokenizerError;
use kano_chunk::stats;
use kano_chunk::Pipeline;

/// Deterministic chunking and token budgeting for embedding pipelines.
#[derive(Parser)]
#[command(name = "kano-chunk", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk a document and fit every chunk into the token budget.
    Chunk {
        file: PathBuf,

        /// Source ID embedded in chunk IDs. Defaults to the file path.
        #[arg(long)]
        source_id: Option<String>,

        /// Print chunks as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Count tokens in a file.
    Count {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show budget information and the trimmed text.
    Budget {
        file: PathBuf,

        /// Budget to trim against. Defaults to tokenizer.max_tokens, then chunking.max_tokens.
        #[arg(long)]
        max_tokens: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Test every adapter in the fallback chain.
    Diagnose {
        /// Model to probe. Defaults to tokenizer.model from the config.
        #[arg(long)]
        model: Option<String>,

        /// Also grade each working adapter against known token counts.
        #[arg(long)]
        accuracy: bool,

        /// Extra accuracy cases, JSON `{"test_cases": [...]}`.
        #[arg(long, requires = "accuracy")]
        cases: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Chunk a document, then print cache and degradation statistics.
    Stats {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let pipeline = Pipeline::from_config(cfg).map_err(explain)?;

    match cli.command {
        Commands::Chunk {
            file,
            source_id,
            json,
        } => {
            let text = read_input(&file)?;
            let source_id = source_id.unwrap_or_else(|| file.display().to_string());
            let chunks = pipeline
                .chunk_document(&source_id, &text)
                .map_err(explain)?;
            info!("{} chunks from {}", chunks.len(), file.display());

            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for c in &chunks {
                    println!(
                        "{}  [{}..{}]  {} tokens{}",
                        c.chunk_id,
                        c.start_char,
                        c.end_char,
                        c.token_count.count,
                        if c.trimmed { " (trimmed)" } else { "" }
                    );
                    for line in c.text.lines() {
                        println!("    {}", line);
                    }
                    println!();
                }
            }
        }
        Commands::Count { file, json } => {
            let text = read_input(&file)?;
            let count = pipeline.count_tokens(&text).map_err(explain)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&count)?);
            } else {
                println!("Tokens:    {}", count.count);
                println!("Method:    {}", count.method);
                println!("Tokenizer: {}", count.tokenizer_id);
                println!("Exact:     {}", count.is_exact);
            }
        }
        Commands::Budget {
            file,
            max_tokens,
            json,
        } => {
            let text = read_input(&file)?;
            let tokenizer = pipeline.tokenizer().map_err(explain)?;
            let max = max_tokens
                .or(pipeline.config().tokenizer.max_tokens)
                .or(Some(pipeline.options().max_tokens));
            let manager = TokenBudgetManager::new(tokenizer, max).map_err(explain)?;
            let info = manager.get_budget_info();
            let result = manager.apply_budget(&text).map_err(explain)?;

            if json {
                let out = serde_json::json!({ "budget": info, "result": result });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Tokenizer:     {}", info.tokenizer_id);
                println!("Model:         {}", info.model_name);
                println!("Max tokens:    {}", info.max_tokens);
                println!("Safety margin: {}", info.safety_margin);
                println!("Effective max: {}", info.effective_max);
                println!(
                    "Tokens:        {} -> {}{}",
                    result.original_token_count,
                    result.token_count.count,
                    if result.was_trimmed { " (trimmed)" } else { "" }
                );
                println!();
                println!("{}", result.text);
            }
        }
        Commands::Diagnose {
            model,
            accuracy,
            cases,
            json,
        } => {
            let model = model.unwrap_or_else(|| pipeline.config().tokenizer.model.clone());
            let report = diagnostics::test_adapter_chain(pipeline.registry(), &model);

            let graded = if accuracy {
                let mut validator = AccuracyValidator::new();
                if let Some(path) = &cases {
                    let added = validator.load_cases(path).map_err(explain)?;
                    info!("Loaded {} accuracy cases from {}", added, path.display());
                }
                Some(accuracy::validate_chain(pipeline.registry(), &model, &validator))
            } else {
                None
            };

            match (json, &graded) {
                (true, Some(graded)) => {
                    let out = serde_json::json!({ "chain": report, "accuracy": graded });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                (true, None) => println!("{}", serde_json::to_string_pretty(&report)?),
                (false, _) => {
                    println!("{}", diagnostics::render_report(&report));
                    if let Some(graded) = &graded {
                        let mut reports: Vec<_> = graded.reports.iter().collect();
                        reports.extend(graded.heuristic_vs_exact.iter());
                        println!();
                        println!("{}", accuracy::render_summary(&reports));
                    }
                }
            }
        }
        Commands::Stats { file, json } => {
            let text = read_input(&file)?;
            let source_id = file.display().to_string();
            let chunks = pipeline
                .chunk_document(&source_id, &text)
                .map_err(explain)?;
            let trimmed = chunks.iter().filter(|c| c.trimmed).count();
            let snapshot = stats::collect_stats(&pipeline, chunks.len(), trimmed);
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", stats::render_stats(&snapshot));
            }
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))
}

/// Carry the full remediation text into the CLI error.
fn explain(err: TokenizerError) -> anyhow::Error {
    anyhow::anyhow!(err.detailed_message())
}
