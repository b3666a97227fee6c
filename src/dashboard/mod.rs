//! Dashboard: Axum web server for queries and live subscribers.
//!
//! Serves the latest and historical predictions per stream, the stream
//! status board, and a websocket feed of new predictions.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Bind the dashboard port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;

    info!(port, "Dashboard server starting on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/streams", get(routes::get_streams))
        .route("/api/predictions/:stream", get(routes::get_history))
        .route("/api/predictions/:stream/latest", get(routes::get_latest))
        .route("/ws", get(routes::ws_handler))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
