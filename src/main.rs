use anyhow::{Context, Result};
use clap::Parser;
use feedkeeper::cache::ItemCache;
use feedkeeper::config::{Config, API_KEY_ENV};
use feedkeeper::content::{ChatSummarizer, Summarizer};
use feedkeeper::feed::RssAdapter;
use feedkeeper::pipeline::Pipeline;
use feedkeeper::scheduler::Scheduler;
use feedkeeper::storage::{ItemStore, SqliteBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "feedkeeper",
    about = "Scheduled feed ingestion with optional summaries"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, value_name = "FILE", default_value = "feedkeeper.toml")]
    config: PathBuf,

    /// Run one cycle per source, then exit
    #[arg(long, conflicts_with = "show")]
    once: bool,

    /// Print the stored items of a source as JSON, then exit
    #[arg(long, value_name = "NAME")]
    show: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from '{}'", args.config.display()))?;

    let backend = SqliteBackend::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database '{}'", config.database_path))?;
    let cache = Arc::new(ItemCache::new(config.cache_config()));
    let store = ItemStore::new(Arc::new(backend), cache, config.store_config());

    let client = RssAdapter::default_client().context("Failed to build HTTP client")?;
    let adapter = Arc::new(RssAdapter::new(client.clone()));
    let summarizer = config
        .summarizer_config(std::env::var(API_KEY_ENV).ok())
        .map(|c| Arc::new(ChatSummarizer::new(client, c)) as Arc<dyn Summarizer>);
    if summarizer.is_none() {
        tracing::info!("No [summarizer] section, items will be stored unannotated");
    }

    let pipeline = Pipeline::new(adapter, summarizer, store);
    let shutdown = CancellationToken::new();

    if let Some(name) = &args.show {
        let items = pipeline
            .formatted_items(name, &shutdown)
            .await
            .with_context(|| format!("Failed to read stored items for '{name}'"))?;
        let json = serde_json::to_string_pretty(&items).context("Failed to encode items")?;
        println!("{json}");
        return Ok(());
    }

    if args.once {
        return run_once(&pipeline, &config, &shutdown).await;
    }

    let scheduler = Scheduler::new(pipeline, config.scheduler_config(), shutdown.clone());
    let started = scheduler
        .start_all(config.sources())
        .await
        .context("Failed to start jobs")?;
    tracing::info!(jobs = started, "Scheduler running");

    wait_for_signal().await?;
    tracing::info!("Shutting down");
    scheduler.shutdown().await;
    Ok(())
}

/// One cycle per source, sequentially. Fails if any cycle failed.
async fn run_once(pipeline: &Pipeline, config: &Config, cancel: &CancellationToken) -> Result<()> {
    let mut failed = 0;
    for source in config.sources() {
        match pipeline.run_cycle(&source, cancel).await {
            Ok(report) => println!(
                "{}: fetched {}, summarized {}, stored {}",
                source.name, report.fetched, report.annotated, report.stored
            ),
            Err(e) => {
                failed += 1;
                tracing::error!(source = %source.name, error = %e, "Cycle failed");
                eprintln!("{}: {e}", source.name);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} source(s) failed");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("Received Ctrl+C");
    Ok(())
}
