//! One-shot trainer.
//!
//! Fetches the training window for every configured stream (or the ones
//! named with `--stream`), trains and persists each model, and prints a
//! per-stream result plus a success tally.

use anyhow::Result;
use clap::Parser;
use futures::future::join_all;
use std::sync::Arc;
use tracing::info;

use wingo_predictor::config::AppConfig;
use wingo_predictor::model::{ArtifactStore, ModelManager};
use wingo_predictor::source::wingo::WingoClient;
use wingo_predictor::source::HistorySource;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train and persist one model per stream")]
struct Cli {
    #[arg(short, long, env = "WINGO_CONFIG", default_value = "config.toml")]
    config: String,

    /// Train only these streams (repeatable).
    #[arg(short, long)]
    stream: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wingo_predictor=info,train=info")),
        )
        .init();

    let selected: Vec<_> = cfg
        .streams
        .iter()
        .filter(|s| cli.stream.is_empty() || cli.stream.iter().any(|n| n == s.id.as_str()))
        .cloned()
        .collect();
    if selected.is_empty() {
        anyhow::bail!("No configured stream matches {:?}", cli.stream);
    }

    let source: Arc<dyn HistorySource> = Arc::new(WingoClient::new(
        Some(cfg.source.base_url.clone()),
        Some(cfg.source_timeout()),
    )?);
    let artifacts = ArtifactStore::new(&cfg.service.model_dir);

    info!(streams = selected.len(), pages = cfg.scheduler.retrain_pages, "Training models");

    let runs = selected.into_iter().map(|stream| {
        let manager = ModelManager::new(
            stream,
            cfg.model_params(),
            cfg.features,
            artifacts.clone(),
            source.clone(),
        );
        async move {
            let outcome = manager.train().await;
            (manager.stream().id.clone(), outcome)
        }
    });
    let results = join_all(runs).await;

    let succeeded = results.iter().filter(|(_, o)| o.success).count();
    for (stream, outcome) in &results {
        println!("{stream:>8}: {outcome}");
    }
    println!("Trained {succeeded}/{} models", results.len());

    if succeeded == 0 {
        anyhow::bail!("No model trained successfully");
    }
    Ok(())
}
