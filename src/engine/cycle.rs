//! One prediction cycle for one stream.
//!
//! fetch → featurize → predict → persist → notify. Any recoverable
//! failure aborts the cycle at its current stage; the stream returns to
//! idle and tries again on its next tick. A prediction that failed to
//! persist is never handed to the notifier.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::status::{CycleStage, StatusBoard};
use crate::features::build_features;
use crate::model::{Forecaster, ModelError};
use crate::notify::NotifierHandle;
use crate::source::{fetch_history, HistorySource};
use crate::storage::PredictionStore;
use crate::types::{next_period, Prediction, StreamConfig};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CycleParams {
    /// History pages fetched per cycle.
    pub recent_pages: u32,
    /// Raw records required before a cycle may predict.
    pub min_records: usize,
    /// Confidence at or above which a prediction is flagged safe.
    pub safe_threshold: f64,
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            recent_pages: 5,
            min_records: 50,
            safe_threshold: 0.80,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AbortReason {
    #[error("Not enough data: {records} records, need {required}")]
    InsufficientData { records: usize, required: usize },

    #[error("Latest draw has undefined features")]
    NoFeatureRow,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Failed to persist prediction: {0}")]
    Persist(String),
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Persisted (with its row id) and handed to the notifier.
    Published(Prediction),
    Aborted {
        stage: CycleStage,
        reason: AbortReason,
    },
}

impl CycleOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, CycleOutcome::Published(_))
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Everything one stream needs to run its cycle.
pub struct StreamWorker {
    stream: StreamConfig,
    params: CycleParams,
    source: Arc<dyn HistorySource>,
    forecaster: Arc<dyn Forecaster>,
    store: Arc<dyn PredictionStore>,
    notifier: NotifierHandle,
    status: Arc<StatusBoard>,
}

impl StreamWorker {
    pub fn new(
        stream: StreamConfig,
        params: CycleParams,
        source: Arc<dyn HistorySource>,
        forecaster: Arc<dyn Forecaster>,
        store: Arc<dyn PredictionStore>,
        notifier: NotifierHandle,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            stream,
            params,
            source,
            forecaster,
            store,
            notifier,
            status,
        }
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }

    pub fn forecaster(&self) -> &Arc<dyn Forecaster> {
        &self.forecaster
    }

    pub fn status(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Run one full cycle. Never panics or returns an error; failures come
    /// back as [`CycleOutcome::Aborted`] and are logged.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();
        let outcome = self.cycle().await;

        match &outcome {
            CycleOutcome::Published(p) => {
                self.status.record_published(p).await;
                info!(
                    stream = %self.stream.id,
                    period = %p.period,
                    color = %p.color,
                    confidence = format!("{:.3}", p.confidence),
                    safe = p.safe,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Prediction published"
                );
            }
            CycleOutcome::Aborted { stage, reason } => {
                self.status
                    .record_aborted(&self.stream.id, reason.to_string())
                    .await;
                match reason {
                    AbortReason::InsufficientData { .. } | AbortReason::NoFeatureRow => {
                        info!(stream = %self.stream.id, stage = %stage, reason = %reason, "Cycle skipped")
                    }
                    _ => warn!(stream = %self.stream.id, stage = %stage, reason = %reason, "Cycle aborted"),
                }
            }
        }
        outcome
    }

    async fn cycle(&self) -> CycleOutcome {
        let id = &self.stream.id;

        // -- Fetch -----------------------------------------------------------
        self.status.set_stage(id, CycleStage::Fetching).await;
        let records = fetch_history(self.source.as_ref(), &self.stream, self.params.recent_pages).await;
        if records.len() < self.params.min_records {
            return abort(
                CycleStage::Fetching,
                AbortReason::InsufficientData {
                    records: records.len(),
                    required: self.params.min_records,
                },
            );
        }

        // -- Featurize -------------------------------------------------------
        self.status.set_stage(id, CycleStage::Featurizing).await;
        let features = build_features(&records, &self.forecaster.feature_config());
        let Some(latest) = features.latest else {
            return abort(CycleStage::Featurizing, AbortReason::NoFeatureRow);
        };
        debug!(stream = %id, records = records.len(), examples = features.rows.len(), "Features built");

        // -- Predict ---------------------------------------------------------
        self.status.set_stage(id, CycleStage::Predicting).await;
        let predict_started = Instant::now();
        let forecast = match self.forecaster.forecast(&latest).await {
            Ok(f) => f,
            Err(e) => return abort(CycleStage::Predicting, e.into()),
        };
        if forecast.fallback_trained {
            warn!(
                stream = %id,
                elapsed_ms = predict_started.elapsed().as_millis() as u64,
                "Prediction waited on fallback training"
            );
        }

        let mut prediction = Prediction::new(
            id.clone(),
            next_period(Some(&latest.issue_number)),
            forecast.color,
            forecast.confidence,
            self.params.safe_threshold,
            forecast.model,
        );

        // -- Persist ---------------------------------------------------------
        self.status.set_stage(id, CycleStage::Persisting).await;
        match self.store.append(&prediction).await {
            Ok(row_id) => prediction.id = Some(row_id),
            Err(e) => return abort(CycleStage::Persisting, AbortReason::Persist(format!("{e:#}"))),
        }

        // -- Notify ----------------------------------------------------------
        self.status.set_stage(id, CycleStage::Notifying).await;
        self.notifier.publish(prediction.clone());

        CycleOutcome::Published(prediction)
    }
}

fn abort(stage: CycleStage, reason: AbortReason) -> CycleOutcome {
    CycleOutcome::Aborted { stage, reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
