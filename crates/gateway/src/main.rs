//! Promptweave server binary.
//!
//! Loads configuration, wires the provider/index backends into the
//! dispatcher, and serves the chat gateway.

use clap::Parser;
use promptweave_config::AppConfig;
use promptweave_core::provider::{CompletionProvider, EmbeddingProvider};
use promptweave_core::quote::QuoteItem;
use promptweave_core::record::LogSink;
use promptweave_dispatch::executors::ExecutorRegistry;
use promptweave_dispatch::{FlowDispatcher, RunDeps};
use promptweave_gateway::{GatewayState, run_policy, serve};
use promptweave_providers::OpenAiCompatProvider;
use promptweave_retrieval::{IndexEntry, InMemoryIndex};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "promptweave", about = "Workflow graph dispatch server")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "promptweave.toml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// JSON file of index entries to load into the in-memory index
    #[arg(long)]
    seed: Option<PathBuf>,
}

/// One seed-file entry.
#[derive(Deserialize)]
struct SeedEntry {
    partition: String,
    embedding: Vec<f32>,
    id: String,
    question: String,
    answer: String,
    #[serde(default)]
    source: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let api_key = config.provider.api_key.clone().unwrap_or_else(|| {
        warn!("No API key configured; provider calls will fail");
        String::new()
    });
    let provider = Arc::new(OpenAiCompatProvider::new(
        config.provider.name.clone(),
        config.provider.base_url.clone(),
        api_key,
        config.provider.embedding_model.clone(),
    ));

    let index = Arc::new(InMemoryIndex::new());
    if let Some(seed_path) = &args.seed {
        let raw = std::fs::read_to_string(seed_path)?;
        let entries: Vec<SeedEntry> = serde_json::from_str(&raw)?;
        let count = entries.len();
        index
            .load(
                entries
                    .into_iter()
                    .map(|e| IndexEntry {
                        partition: e.partition,
                        embedding: e.embedding,
                        quote: QuoteItem::new(e.id, e.question, e.answer, e.source),
                    })
                    .collect(),
            )
            .await;
        info!(count, "Loaded index seed entries");
    }

    let deps = RunDeps {
        completion: Some(provider.clone() as Arc<dyn CompletionProvider>),
        embedder: Some(provider as Arc<dyn EmbeddingProvider>),
        index: Some(index),
        http: reqwest::Client::new(),
        default_model: config.provider.model.clone(),
        quote_label: config.retrieval.quote_label.clone(),
    };

    let dispatcher = FlowDispatcher::new(ExecutorRegistry::with_builtins(), deps)
        .with_policy(run_policy(&config))
        .with_sink(Arc::new(LogSink));

    let state = Arc::new(GatewayState {
        config,
        dispatcher: Arc::new(dispatcher),
    });

    serve(state).await?;
    Ok(())
}
