//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so an empty file yields the reference deployment:
//! four WinGo streams, 5-page cycles, a 0.80 safe threshold and a daily
//! retrain.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::engine::{CycleParams, RetrainPolicy};
use crate::features::FeatureConfig;
use crate::model::forest::ForestParams;
use crate::model::ModelParams;
use crate::notify::NotifierParams;
use crate::source::wingo::DEFAULT_BASE_URL;
use crate::storage::DEFAULT_DATABASE_URL;
use crate::types::{PredictorError, StreamConfig};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default = "StreamConfig::reference_set")]
    pub streams: Vec<StreamConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub database_url: String,
    /// Directory holding one model artifact per stream.
    pub model_dir: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            model_dir: "models".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub recent_pages: u32,
    pub min_cycle_records: usize,
    pub safe_threshold: f64,
    pub retrain_interval_hours: u64,
    pub retrain_pages: u32,
    pub train_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recent_pages: 5,
            min_cycle_records: 50,
            safe_threshold: 0.80,
            retrain_interval_hours: 24,
            retrain_pages: 50,
            train_on_startup: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_split: usize,
    pub max_features: usize,
    pub seed: u64,
    pub test_fraction: f64,
    pub min_training_records: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let forest = ForestParams::default();
        let model = ModelParams::default();
        Self {
            n_trees: forest.n_trees,
            max_depth: forest.max_depth,
            min_samples_split: forest.min_samples_split,
            max_features: forest.max_features,
            seed: forest.seed,
            test_fraction: model.test_fraction,
            min_training_records: model.min_training_records,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub delivery_timeout_ms: u64,
    pub queue_capacity: usize,
    pub subscriber_buffer: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 2_000,
            queue_capacity: 256,
            subscriber_buffer: 32,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            source: SourceConfig::default(),
            scheduler: SchedulerConfig::default(),
            model: ModelConfig::default(),
            features: FeatureConfig::default(),
            notify: NotifyConfig::default(),
            dashboard: DashboardConfig::default(),
            streams: StreamConfig::reference_set(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid config file: {path}"))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PredictorError> {
        if self.streams.is_empty() {
            return Err(PredictorError::Config("no streams configured".into()));
        }
        let mut seen = HashSet::new();
        for s in &self.streams {
            if !seen.insert(&s.id) {
                return Err(PredictorError::Config(format!("duplicate stream id {}", s.id)));
            }
            if s.interval_secs == 0 {
                return Err(PredictorError::Config(format!("stream {} has a zero interval", s.id)));
            }
            if s.endpoint.trim().is_empty() {
                return Err(PredictorError::Config(format!("stream {} has no endpoint", s.id)));
            }
        }

        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(PredictorError::Config(format!("{name} must be in [0, 1], got {v}")))
            }
        };
        unit("scheduler.safe_threshold", self.scheduler.safe_threshold)?;
        unit("model.test_fraction", self.model.test_fraction)?;

        if self.scheduler.retrain_interval_hours == 0 {
            return Err(PredictorError::Config("scheduler.retrain_interval_hours must be positive".into()));
        }
        if self.scheduler.recent_pages == 0 || self.scheduler.retrain_pages == 0 {
            return Err(PredictorError::Config("page counts must be positive".into()));
        }
        if self.model.n_trees == 0 {
            return Err(PredictorError::Config("model.n_trees must be positive".into()));
        }
        Ok(())
    }

    pub fn stream(&self, id: &str) -> Option<&StreamConfig> {
        self.streams.iter().find(|s| s.id.as_str() == id)
    }

    // -- Component parameters --------------------------------------------

    pub fn cycle_params(&self) -> CycleParams {
        CycleParams {
            recent_pages: self.scheduler.recent_pages,
            min_records: self.scheduler.min_cycle_records,
            safe_threshold: self.scheduler.safe_threshold,
        }
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            forest: ForestParams {
                n_trees: self.model.n_trees,
                max_depth: self.model.max_depth,
                min_samples_split: self.model.min_samples_split,
                max_features: self.model.max_features,
                seed: self.model.seed,
            },
            test_fraction: self.model.test_fraction,
            min_training_records: self.model.min_training_records,
            training_pages: self.scheduler.retrain_pages,
        }
    }

    pub fn retrain_policy(&self) -> RetrainPolicy {
        RetrainPolicy {
            interval: Duration::from_secs(self.scheduler.retrain_interval_hours * 3600),
            on_startup: self.scheduler.train_on_startup,
        }
    }

    pub fn notifier_params(&self) -> NotifierParams {
        NotifierParams {
            delivery_timeout: Duration::from_millis(self.notify.delivery_timeout_ms),
            queue_capacity: self.notify.queue_capacity,
            subscriber_buffer: self.notify.subscriber_buffer,
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }
}
