//! Per-stream status board.
//!
//! Written by the stream workers and the retrain loop, read by the
//! dashboard. Holds only counters and the current stage; predictions
//! themselves live in the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::{Prediction, StreamConfig, StreamId, TrainingOutcome};

/// Where a stream currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStage {
    Idle,
    Fetching,
    Featurizing,
    Predicting,
    Persisting,
    Notifying,
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleStage::Idle => "IDLE",
            CycleStage::Fetching => "FETCHING",
            CycleStage::Featurizing => "FEATURIZING",
            CycleStage::Predicting => "PREDICTING",
            CycleStage::Persisting => "PERSISTING",
            CycleStage::Notifying => "NOTIFYING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream: StreamId,
    pub endpoint: String,
    pub interval_secs: u64,
    pub stage: CycleStage,
    pub cycles_published: u64,
    pub cycles_aborted: u64,
    pub last_abort: Option<String>,
    pub last_period: Option<String>,
    pub last_prediction_at: Option<DateTime<Utc>>,
    pub last_retrain_at: Option<DateTime<Utc>>,
    pub last_retrain_success: Option<bool>,
}

impl StreamStatus {
    fn new(stream: &StreamConfig) -> Self {
        Self {
            stream: stream.id.clone(),
            endpoint: stream.endpoint.clone(),
            interval_secs: stream.interval_secs,
            stage: CycleStage::Idle,
            cycles_published: 0,
            cycles_aborted: 0,
            last_abort: None,
            last_period: None,
            last_prediction_at: None,
            last_retrain_at: None,
            last_retrain_success: None,
        }
    }
}

pub struct StatusBoard {
    streams: RwLock<HashMap<StreamId, StreamStatus>>,
}

impl StatusBoard {
    pub fn new(streams: &[StreamConfig]) -> Self {
        Self {
            streams: RwLock::new(
                streams
                    .iter()
                    .map(|s| (s.id.clone(), StreamStatus::new(s)))
                    .collect(),
            ),
        }
    }

    pub async fn contains(&self, stream: &StreamId) -> bool {
        self.streams.read().await.contains_key(stream)
    }

    pub async fn get(&self, stream: &StreamId) -> Option<StreamStatus> {
        self.streams.read().await.get(stream).cloned()
    }

    /// All streams, ordered by native interval.
    pub async fn snapshot(&self) -> Vec<StreamStatus> {
        let mut all: Vec<StreamStatus> = self.streams.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.interval_secs
                .cmp(&b.interval_secs)
                .then_with(|| a.stream.cmp(&b.stream))
        });
        all
    }

    pub async fn set_stage(&self, stream: &StreamId, stage: CycleStage) {
        if let Some(s) = self.streams.write().await.get_mut(stream) {
            s.stage = stage;
        }
    }

    pub async fn record_published(&self, prediction: &Prediction) {
        if let Some(s) = self.streams.write().await.get_mut(&prediction.game_type) {
            s.stage = CycleStage::Idle;
            s.cycles_published += 1;
            s.last_period = Some(prediction.period.clone());
            s.last_prediction_at = Some(prediction.timestamp);
        }
    }

    pub async fn record_aborted(&self, stream: &StreamId, reason: String) {
        if let Some(s) = self.streams.write().await.get_mut(stream) {
            s.stage = CycleStage::Idle;
            s.cycles_aborted += 1;
            s.last_abort = Some(reason);
        }
    }

    pub async fn record_retrain(&self, stream: &StreamId, outcome: &TrainingOutcome) {
        if let Some(s) = self.streams.write().await.get_mut(stream) {
            s.last_retrain_at = Some(Utc::now());
            s.last_retrain_success = Some(outcome.success);
        }
    }
}
