//! Model lifecycle manager for a single stream.
//!
//! Owns the stream's artifact slot: trains (CPU work on the blocking
//! pool), persists atomically, caches the loaded artifact and predicts.
//! Training runs for one stream are serialised so two writers never race
//! on the same artifact; a failed run leaves the previous model in place.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use super::artifact::{ArtifactStore, ModelArtifact};
use super::encoder::LabelEncoder;
use super::forest::ColorForest;
use super::{Forecast, Forecaster, ModelError, ModelParams};
use crate::features::{build_features, FeatureConfig, FeatureVector, FEATURE_NAMES};
use crate::source::{fetch_history, HistorySource};
use crate::types::{OutcomeRecord, StreamConfig, StreamId, TrainingOutcome};

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Build features from raw records and fit a complete artifact.
pub fn fit_artifact(
    stream: &StreamId,
    records: &[OutcomeRecord],
    params: &ModelParams,
    features: &FeatureConfig,
) -> Result<ModelArtifact, ModelError> {
    if records.len() < params.min_training_records {
        return Err(ModelError::InsufficientData {
            records: records.len(),
            required: params.min_training_records,
        });
    }

    let set = build_features(records, features);
    if set.len() < 2 {
        return Err(ModelError::InsufficientData {
            records: set.len(),
            required: 2,
        });
    }

    let encoder = LabelEncoder::fit(&set.labels);
    let x: Vec<Vec<f64>> = set.rows.iter().map(|r| r.values.to_vec()).collect();
    let y: Vec<u32> = set
        .labels
        .iter()
        .map(|&c| encoder.encode(c))
        .collect::<Option<_>>()
        .ok_or_else(|| ModelError::Fit("label missing from encoder".into()))?;

    let (train_idx, test_idx) = split_indices(x.len(), params.test_fraction, params.forest.seed);
    let (x_train, y_train) = select(&x, &y, &train_idx);
    let (x_test, y_test) = select(&x, &y, &test_idx);

    let forest = ColorForest::fit(&x_train, &y_train, encoder.len(), &params.forest)?;
    let train_score = forest.score(&x_train, &y_train)?;
    let test_score = forest.score(&x_test, &y_test)?;

    Ok(ModelArtifact {
        stream: stream.clone(),
        trained_at: Utc::now(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        features: *features,
        encoder,
        forest,
        train_score,
        test_score,
        examples: x.len(),
    })
}

/// Seeded shuffle split into (train, test) index sets. The test share is
/// rounded up but always leaves at least one training row.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = ((n as f64) * test_fraction.clamp(0.0, 1.0)).ceil() as usize;
    let n_test = n_test.min(n.saturating_sub(1));
    let train = idx[n_test..].to_vec();
    let test = idx[..n_test].to_vec();
    (train, test)
}

fn select(x: &[Vec<f64>], y: &[u32], idx: &[usize]) -> (Vec<Vec<f64>>, Vec<u32>) {
    idx.iter().map(|&i| (x[i].clone(), y[i])).unzip()
}

/// Read a stream's persisted artifact, ignoring one built for a different
/// feature layout.
fn load_matching(
    store: &ArtifactStore,
    stream: &StreamId,
    features: &FeatureConfig,
) -> Result<Option<ModelArtifact>, ModelError> {
    let artifact = store
        .load(stream)
        .map_err(|e| ModelError::Storage(format!("{e:#}")))?;

    Ok(artifact.filter(|a| {
        let ok = a.matches_schema(features);
        if !ok {
            warn!(stream = %stream, "Persisted model uses a different feature layout, ignoring");
        }
        ok
    }))
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Lifecycle manager for one stream's model.
pub struct ModelManager {
    stream: StreamConfig,
    params: ModelParams,
    features: FeatureConfig,
    store: ArtifactStore,
    source: Arc<dyn HistorySource>,
    active: RwLock<Option<Arc<ModelArtifact>>>,
    training: Mutex<()>,
}

impl ModelManager {
    pub fn new(
        stream: StreamConfig,
        params: ModelParams,
        features: FeatureConfig,
        store: ArtifactStore,
        source: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            stream,
            params,
            features,
            store,
            source,
            active: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    pub fn stream(&self) -> &StreamConfig {
        &self.stream
    }

    /// Fetch the training window from the source and train on it.
    pub async fn train(&self) -> TrainingOutcome {
        let _guard = self.training.lock().await;
        self.fetch_and_fit().await
    }

    /// Train on records the caller already holds.
    pub async fn train_on(&self, records: Vec<OutcomeRecord>) -> TrainingOutcome {
        let _guard = self.training.lock().await;
        self.fit_and_store(records).await
    }

    /// Read the persisted artifact. Artifacts built for a different
    /// feature layout are reported as absent.
    pub fn load(&self) -> Result<Option<ModelArtifact>, ModelError> {
        load_matching(&self.store, &self.stream.id, &self.features)
    }

    /// Predict the next colour. Trains synchronously first when no model
    /// is cached or persisted; `Forecast::fallback_trained` reports it.
    pub async fn predict(&self, latest: &FeatureVector) -> Result<Forecast, ModelError> {
        let (model, fallback_trained) = match self.current().await {
            Some(model) => (model, false),
            None => (self.fallback_model().await?, true),
        };

        let (color, confidence) = model.predict(latest)?;
        Ok(Forecast {
            color,
            confidence,
            model: model.tag(),
            fallback_trained,
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn current(&self) -> Option<Arc<ModelArtifact>> {
        if let Some(model) = self.active.read().await.clone() {
            return Some(model);
        }

        let store = self.store.clone();
        let stream = self.stream.id.clone();
        let features = self.features;
        let loaded = tokio::task::spawn_blocking(move || load_matching(&store, &stream, &features))
            .await
            .unwrap_or_else(|e| Err(ModelError::Storage(format!("load task failed: {e}"))));

        match loaded {
            Ok(Some(artifact)) => {
                let model = Arc::new(artifact);
                *self.active.write().await = Some(model.clone());
                Some(model)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(stream = %self.stream.id, error = %e, "Could not load persisted model");
                None
            }
        }
    }

    async fn fallback_model(&self) -> Result<Arc<ModelArtifact>, ModelError> {
        let _guard = self.training.lock().await;
        // Another task may have finished training while we waited.
        if let Some(model) = self.current().await {
            return Ok(model);
        }

        warn!(stream = %self.stream.id, "No model found, training before predicting");
        let started = Instant::now();
        let outcome = self.fetch_and_fit().await;
        info!(
            stream = %self.stream.id,
            success = outcome.success,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fallback training finished"
        );

        if !outcome.success {
            return Err(ModelError::Unavailable {
                stream: self.stream.id.clone(),
                reason: outcome.reason.unwrap_or_else(|| "training failed".into()),
            });
        }
        self.current().await.ok_or_else(|| ModelError::Unavailable {
            stream: self.stream.id.clone(),
            reason: "model missing after training".into(),
        })
    }

    async fn fetch_and_fit(&self) -> TrainingOutcome {
        let records =
            fetch_history(self.source.as_ref(), &self.stream, self.params.training_pages).await;
        info!(
            stream = %self.stream.id,
            records = records.len(),
            pages = self.params.training_pages,
            "Training history fetched"
        );
        self.fit_and_store(records).await
    }

    async fn fit_and_store(&self, records: Vec<OutcomeRecord>) -> TrainingOutcome {
        let stream = self.stream.id.clone();
        let params = self.params.clone();
        let features = self.features;
        let store = self.store.clone();

        let result = tokio::task::spawn_blocking(move || -> Result<ModelArtifact, ModelError> {
            let artifact = fit_artifact(&stream, &records, &params, &features)?;
            store
                .save(&artifact)
                .map_err(|e| ModelError::Storage(format!("{e:#}")))?;
            Ok(artifact)
        })
        .await;

        match result {
            Ok(Ok(artifact)) => {
                let outcome = TrainingOutcome::trained(
                    artifact.train_score,
                    artifact.test_score,
                    artifact.examples,
                );
                info!(
                    stream = %self.stream.id,
                    examples = artifact.examples,
                    train_score = format!("{:.3}", artifact.train_score),
                    test_score = format!("{:.3}", artifact.test_score),
                    model = %artifact.tag(),
                    "Model trained"
                );
                *self.active.write().await = Some(Arc::new(artifact));
                outcome
            }
            Ok(Err(e)) => {
                warn!(stream = %self.stream.id, error = %e, "Training failed, keeping previous model");
                TrainingOutcome::failed(e.to_string())
            }
            Err(e) => {
                error!(stream = %self.stream.id, error = %e, "Training task panicked");
                TrainingOutcome::failed(format!("training task failed: {e}"))
            }
        }
    }
}

#[async_trait]
impl Forecaster for ModelManager {
    fn feature_config(&self) -> FeatureConfig {
        self.features
    }

    async fn forecast(&self, latest: &FeatureVector) -> Result<Forecast, ModelError> {
        self.predict(latest).await
    }

    async fn retrain(&self) -> TrainingOutcome {
        self.train().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
