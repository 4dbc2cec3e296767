mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use lore_gateway::{AppState, GatewayServer};
use lore_index::{
    IngestRequest, IngestionCoordinator, LocalSource, RetrievalService, StatusRegistry,
};
use lore_llm::{CompletionClient, EmbeddingGateway};
use lore_store::select_store;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "lore", version, about = "Repository QA service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "lore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve,
    /// Ingest a local checkout and exit.
    Ingest {
        /// Repository key, `owner/name`.
        #[arg(long)]
        repo: String,
        /// Commit SHA of the checkout.
        #[arg(long)]
        commit: String,
        /// Pull request number (takes precedence over --branch).
        #[arg(long)]
        pr: Option<u64>,
        /// Branch name.
        #[arg(long)]
        branch: Option<String>,
        /// Checkout root directory.
        #[arg(long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Ingest {
            repo,
            commit,
            pr,
            branch,
            path,
        } => ingest(config, repo, commit, pr, branch, path).await,
    }
}

async fn build_state(config: &Config) -> AppState {
    let (store, backend) = select_store(config.store.url.as_deref()).await;
    tracing::info!(?backend, "vector store selected");

    let api_key = std::env::var("LORE_API_KEY").unwrap_or_default();
    let embed_key = std::env::var("LORE_EMBED_API_KEY").unwrap_or_else(|_| api_key.clone());

    let embedder: Arc<dyn lore_llm::Embedder> = Arc::new(EmbeddingGateway::new(
        embed_key,
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
        config.embedding.batch_size,
    ));
    let provider: Arc<dyn lore_llm::LlmProvider> = Arc::new(CompletionClient::new(
        api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.max_tokens,
    ));

    let registry = StatusRegistry::new();
    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        registry.clone(),
        config.ingest_config(),
    ));
    let retrieval = Arc::new(RetrievalService::new(store, embedder));

    AppState {
        coordinator,
        retrieval,
        provider,
        registry,
        status_retention: Duration::from_secs(config.retrieval.status_retention_secs),
        default_k: config.retrieval.default_k,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    GatewayServer::new(&config.server.bind, config.server.port, state, shutdown_rx)
        .with_max_body_size(config.server.max_body_size)
        .serve()
        .await
        .context("gateway server failed")
}

async fn ingest(
    config: Config,
    repo: String,
    commit: String,
    pr: Option<u64>,
    branch: Option<String>,
    path: PathBuf,
) -> anyhow::Result<()> {
    let state = build_state(&config).await;

    let rev = match (pr, branch) {
        (Some(n), _) => format!("pr{n}"),
        (None, Some(b)) => b,
        (None, None) => "main".to_string(),
    };
    let request = IngestRequest {
        repo_key: repo,
        rev,
        commit,
    };

    let source = LocalSource::new(path);
    let outcome = state
        .coordinator
        .ingest(&request, &source)
        .await
        .context("ingestion failed")?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
