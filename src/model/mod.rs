//! Per-stream model lifecycle: train, persist, load, predict.
//!
//! Defines the `Forecaster` trait consumed by the scheduler and the
//! `ModelManager` that implements it. Each stream owns its own manager;
//! no classifier state is shared between streams.

pub mod artifact;
pub mod encoder;
pub mod forest;
pub mod manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::features::{FeatureConfig, FeatureVector};
use crate::types::{Color, StreamId, TrainingOutcome};

pub use artifact::{ArtifactStore, ModelArtifact};
pub use manager::ModelManager;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Training configuration for one stream's model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub forest: forest::ForestParams,
    /// Share of labelled examples held out for evaluation.
    pub test_fraction: f64,
    /// Raw records required before training is attempted.
    pub min_training_records: usize,
    /// History pages fetched for a training run.
    pub training_pages: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            forest: forest::ForestParams::default(),
            test_fraction: 0.2,
            min_training_records: 100,
            training_pages: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

/// A model's answer for the latest draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub color: Color,
    /// Top-class probability, in [0, 1].
    pub confidence: f64,
    /// Tag of the producing model.
    pub model: String,
    /// Set when no model existed and one was trained before predicting.
    pub fallback_trained: bool,
}

/// Produces forecasts for one stream and keeps its model current.
#[async_trait]
pub trait Forecaster: Send + Sync {
    /// Feature settings the model expects its input rows to be built with.
    fn feature_config(&self) -> FeatureConfig;

    /// Forecast the next colour from the latest feature row, training a
    /// model first if none is available.
    async fn forecast(&self, latest: &FeatureVector) -> Result<Forecast, ModelError>;

    /// Refetch a training window and train a replacement model.
    async fn retrain(&self) -> TrainingOutcome;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Not enough data: {records} records, need {required}")]
    InsufficientData { records: usize, required: usize },

    #[error("Model fit failed: {0}")]
    Fit(String),

    #[error("Prediction failed: {0}")]
    Predict(String),

    #[error("Feature schema mismatch: {0}")]
    Schema(String),

    #[error("Class index {0} is not in the model's label encoder")]
    Decode(u32),

    #[error("No model available for {stream}: {reason}")]
    Unavailable { stream: StreamId, reason: String },

    #[error("Artifact storage error: {0}")]
    Storage(String),
}
