//! WinGo predictor service.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the prediction store, builds one worker per stream and runs the
//! scheduler until Ctrl+C, then shuts down cleanly.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use wingo_predictor::config::AppConfig;
use wingo_predictor::dashboard::{self, DashboardState};
use wingo_predictor::engine::{Scheduler, StatusBoard, StreamWorker};
use wingo_predictor::model::{ArtifactStore, Forecaster, ModelManager};
use wingo_predictor::notify::NotifierHandle;
use wingo_predictor::source::wingo::WingoClient;
use wingo_predictor::source::HistorySource;
use wingo_predictor::storage::{PredictionStore, SqlitePredictionStore};

#[derive(Parser, Debug)]
#[command(name = "wingo-predictor", version, about = "Multi-stream colour prediction service")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "WINGO_CONFIG", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    init_logging();

    info!(
        config = %cli.config,
        streams = cfg.streams.len(),
        safe_threshold = cfg.scheduler.safe_threshold,
        "WinGo predictor starting up"
    );

    // -- Shared components -----------------------------------------------

    let source: Arc<dyn HistorySource> = Arc::new(WingoClient::new(
        Some(cfg.source.base_url.clone()),
        Some(cfg.source_timeout()),
    )?);
    let store: Arc<dyn PredictionStore> =
        Arc::new(SqlitePredictionStore::connect(&cfg.service.database_url).await?);
    let artifacts = ArtifactStore::new(&cfg.service.model_dir);
    let notifier = NotifierHandle::spawn(cfg.notifier_params());
    let status = Arc::new(StatusBoard::new(&cfg.streams));

    // -- Per-stream workers ----------------------------------------------

    let workers: Vec<Arc<StreamWorker>> = cfg
        .streams
        .iter()
        .map(|stream| {
            let manager: Arc<dyn Forecaster> = Arc::new(ModelManager::new(
                stream.clone(),
                cfg.model_params(),
                cfg.features,
                artifacts.clone(),
                source.clone(),
            ));
            Arc::new(StreamWorker::new(
                stream.clone(),
                cfg.cycle_params(),
                source.clone(),
                manager,
                store.clone(),
                notifier.clone(),
                status.clone(),
            ))
        })
        .collect();

    // -- Dashboard ---------------------------------------------------------

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(store.clone(), status.clone(), notifier.clone()));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    // -- Run -------------------------------------------------------------

    let scheduler = Scheduler::new(workers, cfg.retrain_policy()).start();
    info!("Scheduler running. Press Ctrl+C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received, letting in-flight cycles finish");

    if tokio::time::timeout(Duration::from_secs(120), scheduler.shutdown())
        .await
        .is_err()
    {
        warn!("Timed out waiting for in-flight work");
    }

    info!("WinGo predictor shut down cleanly.");
    Ok(())
}

/// Initialise the tracing subscriber with env-filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wingo_predictor=info"));

    let json_logging = std::env::var("WINGO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
