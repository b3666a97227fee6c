//! Trained model artifacts and their on-disk store.
//!
//! One JSON document per stream holds the classifier, the label encoder
//! it was trained with, and the feature schema, so the pair can never be
//! loaded half-updated. Writes go to a unique temp file that is fsynced
//! and renamed over the target; a reader sees either the old artifact or
//! the new one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::encoder::LabelEncoder;
use super::forest::ColorForest;
use super::ModelError;
use crate::features::{FeatureConfig, FeatureVector, FEATURE_NAMES};
use crate::types::{Color, StreamId};

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// A classifier together with the encoder and feature schema it was fit on.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub stream: StreamId,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub features: FeatureConfig,
    pub encoder: LabelEncoder,
    pub forest: ColorForest,
    pub train_score: f64,
    pub test_score: f64,
    pub examples: usize,
}

impl ModelArtifact {
    /// Tag recorded on every prediction this model produces.
    pub fn tag(&self) -> String {
        format!(
            "ensemble_rf_{}@{}",
            self.stream,
            self.trained_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    /// Whether this artifact was trained on the current feature layout.
    pub fn matches_schema(&self, features: &FeatureConfig) -> bool {
        self.features == *features
            && self.feature_names.iter().map(String::as_str).eq(FEATURE_NAMES)
    }

    /// Predicted colour and top-class probability for one feature row.
    pub fn predict(&self, row: &FeatureVector) -> Result<(Color, f64), ModelError> {
        let (index, confidence) = self.forest.predict_one(&row.values)?;
        let color = self.encoder.decode(index).ok_or(ModelError::Decode(index))?;
        Ok((color, confidence))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Directory of per-stream artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for a stream.
    pub fn path_for(&self, stream: &StreamId) -> PathBuf {
        self.dir.join(format!("rf_model_{}.json", file_stem(stream)))
    }

    /// Atomically replace the stream's artifact.
    pub fn save(&self, artifact: &ModelArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create model directory {}", self.dir.display()))?;

        let target = self.path_for(&artifact.stream);
        let tmp = self.dir.join(format!(
            ".rf_model_{}.{}.tmp",
            file_stem(&artifact.stream),
            uuid::Uuid::new_v4()
        ));

        let json = serde_json::to_vec(artifact).context("Failed to serialise model artifact")?;
        let written = write_synced(&tmp, &json).and_then(|()| {
            fs::rename(&tmp, &target)
                .with_context(|| format!("Failed to move artifact into {}", target.display()))
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        info!(
            stream = %artifact.stream,
            path = %target.display(),
            bytes = json.len(),
            "Model artifact saved"
        );
        Ok(target)
    }

    /// Load the stream's artifact. `None` when nothing has been saved yet.
    pub fn load(&self, stream: &StreamId) -> Result<Option<ModelArtifact>> {
        let path = self.path_for(stream);
        if !path.exists() {
            debug!(stream = %stream, path = %path.display(), "No model artifact on disk");
            return Ok(None);
        }

        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        debug!(
            stream = %stream,
            trained_at = %artifact.trained_at,
            examples = artifact.examples,
            "Model artifact loaded"
        );
        Ok(Some(artifact))
    }

    /// Remove the stream's artifact if present.
    #[cfg(test)]
    pub fn delete(&self, stream: &StreamId) -> Result<()> {
        let path = self.path_for(stream);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete artifact {}", path.display()))?;
        }
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    Ok(())
}

fn file_stem(stream: &StreamId) -> String {
    stream
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
