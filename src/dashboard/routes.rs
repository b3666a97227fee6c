//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::engine::{StatusBoard, StreamStatus};
use crate::notify::NotifierHandle;
use crate::storage::PredictionStore;
use crate::types::{Prediction, StreamId};

/// Default and maximum page size for the history endpoint.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub store: Arc<dyn PredictionStore>,
    pub status: Arc<StatusBoard>,
    pub notifier: NotifierHandle,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(
        store: Arc<dyn PredictionStore>,
        status: Arc<StatusBoard>,
        notifier: NotifierHandle,
    ) -> Self {
        Self {
            store,
            status,
            notifier,
            started_at: Utc::now(),
        }
    }

    async fn known_stream(&self, stream: &str) -> Result<StreamId, ApiError> {
        let id = StreamId::new(stream);
        if self.status.contains(&id).await {
            Ok(id)
        } else {
            Err(ApiError::UnknownStream(stream.to_string()))
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
    pub subscribers: usize,
}

/// Latest prediction for a stream; `prediction` is `null` before the first.
#[derive(Debug, Clone, Serialize)]
pub struct LatestResponse {
    pub game_type: StreamId,
    pub prediction: Option<Prediction>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub enum ApiError {
    UnknownStream(String),
    Storage(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownStream(s) => (StatusCode::NOT_FOUND, format!("Unknown stream: {s}")),
            ApiError::Storage(e) => {
                error!(error = %e, "Prediction query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        subscribers: state.notifier.subscriber_count().await,
    })
}

/// GET /api/streams
pub async fn get_streams(State(state): State<AppState>) -> Json<Vec<StreamStatus>> {
    Json(state.status.snapshot().await)
}

/// GET /api/predictions/:stream/latest
pub async fn get_latest(
    State(state): State<AppState>,
    Path(stream): Path<String>,
) -> Result<Json<LatestResponse>, ApiError> {
    let id = state.known_stream(&stream).await?;
    let prediction = state.store.latest(&id).await.map_err(ApiError::Storage)?;
    Ok(Json(LatestResponse {
        game_type: id,
        prediction,
    }))
}

/// GET /api/predictions/:stream?limit=N
pub async fn get_history(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Prediction>>, ApiError> {
    let id = state.known_stream(&stream).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let history = state.store.history(&id, limit).await.map_err(ApiError::Storage)?;
    Ok(Json(history))
}

/// GET /ws: live prediction feed.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| forward_predictions(socket, state))
}

/// Register the socket as a subscriber and forward every delivered
/// prediction as one JSON text frame until either side goes away.
async fn forward_predictions(socket: WebSocket, state: AppState) {
    let mut subscription = state.notifier.subscribe().await;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            delivered = subscription.recv() => {
                let Some(prediction) = delivered else { break };
                let text = match serde_json::to_string(&*prediction) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode prediction");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.notifier.unsubscribe(subscription.id).await;
    debug!(subscriber = subscription.id, "WebSocket closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
