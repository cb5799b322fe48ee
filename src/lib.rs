pub mod config;
pub mod doctor;
pub mod engine;
pub mod indexer;
pub mod output;
pub mod search;
pub mod storage;
pub mod worker;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::info;

use config::{EngineConfig, ModelKind};
use engine::SiftEngine;
use output::JsonOutput;
use search::orchestrator::SearchOptions;
use storage::sqlite::SiftIndex;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "sift",
    version,
    about = "Hybrid keyword + semantic search over a markdown corpus"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search an index: keyword hits first, then semantic hits
    Search {
        /// Query text
        query: String,

        /// Index file
        #[arg(long, env = "SIFT_INDEX")]
        index: Option<PathBuf>,

        /// Maximum results per section
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Emit one JSON object instead of text
        #[arg(long)]
        json: bool,

        /// Skip semantic search (no model load)
        #[arg(long)]
        lexical_only: bool,

        /// Embedding model; hash-built indexes always use the hash model
        #[arg(long, value_enum)]
        model: Option<ModelKind>,

        /// Give up on semantic results after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Index a directory of markdown files
    Index {
        /// Directory containing .md files
        directory: PathBuf,

        /// Output index path
        #[arg(short, long, default_value = config::DEFAULT_INDEX_PATH)]
        output: PathBuf,

        /// Embedding model
        #[arg(long, value_enum)]
        model: Option<ModelKind>,
    },
    /// Validate an index file
    Doctor {
        /// Index file
        #[arg(env = "SIFT_INDEX", default_value = config::DEFAULT_INDEX_PATH)]
        index: PathBuf,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = EngineConfig::from_env();

    match cli.command {
        Commands::Search {
            query,
            index,
            limit,
            json,
            lexical_only,
            model,
            timeout_ms,
        } => {
            if let Some(index) = index {
                config.index_path = index;
            }
            if let Some(limit) = limit {
                config.default_limit = limit;
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(ms) = timeout_ms {
                config.semantic_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
            config.semantic = !lexical_only;
            run_search(&config, &query, json).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Index {
            directory,
            output,
            model,
        } => {
            if let Some(model) = model {
                config.model = model;
            }
            run_index(&config, directory, output).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Doctor { index, json } => {
            let report = tokio::task::spawn_blocking(move || doctor::run_doctor(&index))
                .await
                .context("doctor task failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

async fn run_search(config: &EngineConfig, query: &str, json: bool) -> Result<()> {
    let path = config.index_path.clone();
    let metadata = tokio::task::spawn_blocking(move || SiftIndex::open(&path)?.metadata())
        .await
        .context("index task failed")?
        .with_context(|| format!("opening index {}", config.index_path.display()))?;
    let provider = config.provider_for_index(&metadata);
    let engine = SiftEngine::open(config, provider).await?;

    let (lex_tx, lex_rx) = oneshot::channel();
    let mut options = SearchOptions::new().on_lexical(move |_, chunks| {
        let _ = lex_tx.send(chunks);
    });
    let semantic_rx = if !config.semantic {
        None
    } else {
        let (sem_tx, sem_rx) = oneshot::channel();
        options = options.on_semantic(move |_, hits| {
            let _ = sem_tx.send(hits);
        });
        Some(sem_rx)
    };

    let request_id = engine.search(query, options);
    let lexical = lex_rx.await.unwrap_or_default();
    if !json {
        println!("{}\n", output::format_lexical_human(query, &lexical));
    }

    let semantic = match semantic_rx {
        Some(rx) => Some(rx.await.unwrap_or_default()),
        None => None,
    };
    let semantic_error = engine.orchestrator().state().failure().map(str::to_string);

    if json {
        println!(
            "{}",
            output::format_json(&JsonOutput {
                query,
                request_id,
                lexical: &lexical,
                semantic: semantic.as_deref(),
                semantic_error: semantic_error.as_deref(),
            })
        );
    } else if let Some(hits) = &semantic {
        match &semantic_error {
            Some(reason) => eprintln!("semantic search unavailable: {reason}"),
            None => println!("{}", output::format_semantic_human(query, hits)),
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn run_index(config: &EngineConfig, directory: PathBuf, output: PathBuf) -> Result<()> {
    let provider = config.provider();
    let summary = tokio::task::spawn_blocking(move || {
        let embedder = provider
            .load()
            .with_context(|| format!("loading embedding model {}", provider.id()))?;
        indexer::build_index(&directory, &output, embedder.as_ref())
    })
    .await
    .context("indexing task failed")??;

    info!(documents = summary.documents, "indexing finished");
    println!(
        "Done. {} chunks from {} documents indexed -> {} ({}, {}-dim)",
        summary.chunks,
        summary.documents,
        summary.output.display(),
        summary.model,
        summary.dimension
    );
    Ok(())
}
