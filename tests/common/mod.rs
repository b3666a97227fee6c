//! In-memory fakes for integration testing.
//!
//! Deterministic stand-ins for the history source, prediction store and
//! forecaster, so scheduler and pipeline tests run without network or
//! disk and under paused tokio time.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use wingo_predictor::features::{FeatureConfig, FeatureVector};
use wingo_predictor::model::{Forecast, Forecaster, ModelError};
use wingo_predictor::source::HistorySource;
use wingo_predictor::storage::PredictionStore;
use wingo_predictor::types::*;

/// `n` draws alternating RED/GREEN with a single VIOLET at row 60,
/// returned newest first as the live source does.
pub fn alternating_history(n: usize) -> Vec<OutcomeRecord> {
    (0..n)
        .rev()
        .map(|i| {
            let color = if i == 60 {
                Color::Violet
            } else if i % 2 == 0 {
                Color::Red
            } else {
                Color::Green
            };
            OutcomeRecord::new(format!("2024010110{:05}", i), Some((i % 10) as f64), color)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// History source
// ---------------------------------------------------------------------------

/// Serves a fixed record set per endpoint on page 1; later pages are empty.
#[derive(Default)]
pub struct FakeSource {
    records: Mutex<HashMap<String, Vec<OutcomeRecord>>>,
    pub page_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint: &str, records: Vec<OutcomeRecord>) -> Self {
        self.records.lock().unwrap().insert(endpoint.to_string(), records);
        self
    }
}

#[async_trait]
impl HistorySource for FakeSource {
    async fn fetch_page(&self, stream: &StreamConfig, page: u32) -> Result<Vec<OutcomeRecord>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if page != 1 {
            return Ok(Vec::new());
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&stream.endpoint)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Prediction store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Prediction>>,
}

impl MemoryStore {
    pub fn count(&self, stream: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.game_type.as_str() == stream)
            .count()
    }

    pub fn all(&self) -> Vec<Prediction> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn append(&self, prediction: &Prediction) -> Result<i64> {
        let mut rows = self.rows.lock().unwrap();
        let mut stored = prediction.clone();
        stored.id = Some(rows.len() as i64 + 1);
        rows.push(stored);
        Ok(rows.len() as i64)
    }

    async fn latest(&self, stream: &StreamId) -> Result<Option<Prediction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| &p.game_type == stream)
            .cloned())
    }

    async fn history(&self, stream: &StreamId, limit: usize) -> Result<Vec<Prediction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|p| &p.game_type == stream)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Forecaster
// ---------------------------------------------------------------------------

/// Answers GREEN after `delay`, recording how many forecasts overlap and
/// when each one started.
pub struct StubForecaster {
    delay: Duration,
    retrain_ok: bool,
    epoch: Instant,
    started: Mutex<Vec<Duration>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub forecasts: AtomicUsize,
    pub retrains: AtomicUsize,
}

impl StubForecaster {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            retrain_ok: true,
            epoch: Instant::now(),
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            forecasts: AtomicUsize::new(0),
            retrains: AtomicUsize::new(0),
        }
    }

    pub fn failing_retrain(mut self) -> Self {
        self.retrain_ok = false;
        self
    }

    /// Whole seconds since construction at which each forecast began.
    pub fn start_secs(&self) -> Vec<u64> {
        self.started.lock().unwrap().iter().map(|d| d.as_secs()).collect()
    }
}

#[async_trait]
impl Forecaster for StubForecaster {
    fn feature_config(&self) -> FeatureConfig {
        FeatureConfig::default()
    }

    async fn forecast(&self, _latest: &FeatureVector) -> Result<Forecast, ModelError> {
        self.started.lock().unwrap().push(self.epoch.elapsed());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.forecasts.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Forecast {
            color: Color::Green,
            confidence: 0.9,
            model: "stub".into(),
            fallback_trained: false,
        })
    }

    async fn retrain(&self) -> TrainingOutcome {
        self.retrains.fetch_add(1, Ordering::SeqCst);
        if self.retrain_ok {
            TrainingOutcome::trained(1.0, 0.5, 110)
        } else {
            TrainingOutcome::failed("Not enough data: 10 records, need 100")
        }
    }
}
