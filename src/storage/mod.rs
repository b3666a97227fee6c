//! Persistence layer for emitted predictions.
//!
//! Predictions are appended to a SQLite table through `sqlx`. Every append
//! runs in its own transaction: either the full record is written and its
//! row id returned, or nothing is. The scheduler only notifies subscribers
//! about records that made it to disk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{Color, Prediction, StreamId};

/// Default database location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/predictions.db";

/// Append-only store of predictions, queried by stream.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Durably append a prediction, returning its row id.
    async fn append(&self, prediction: &Prediction) -> Result<i64>;

    /// Most recent prediction for a stream.
    async fn latest(&self, stream: &StreamId) -> Result<Option<Prediction>>;

    /// Up to `limit` predictions for a stream, newest first.
    async fn history(&self, stream: &StreamId, limit: usize) -> Result<Vec<Prediction>>;
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqlitePredictionStore {
    pool: SqlitePool,
}

impl SqlitePredictionStore {
    /// Open (creating if needed) the database at `db_url` and ensure the schema.
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path_part).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("Failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("Invalid database URL {db_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // Each in-memory connection is its own database.
        let in_memory = db_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .min_connections(if in_memory { 1 } else { 0 })
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!(url = db_url, "Connected to prediction database");

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                game_type TEXT NOT NULL,
                period TEXT NOT NULL,
                color TEXT NOT NULL,
                confidence REAL NOT NULL,
                safe BOOLEAN NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create predictions table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_game_type
            ON predictions (game_type, id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create predictions index")?;

        debug!("Prediction schema initialised");
        Ok(())
    }

    fn map_row(row: &SqliteRow) -> Result<Prediction> {
        let color: String = row.try_get("color")?;
        let created_at: String = row.try_get("created_at")?;
        Ok(Prediction {
            id: Some(row.try_get("id")?),
            game_type: StreamId::new(row.try_get::<String, _>("game_type")?),
            period: row.try_get("period")?,
            color: Color::from_str(&color)?,
            confidence: row.try_get("confidence")?,
            safe: row.try_get("safe")?,
            model: row.try_get("model")?,
            timestamp: DateTime::parse_from_rfc3339(&created_at)
                .with_context(|| format!("Bad created_at {created_at}"))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl PredictionStore for SqlitePredictionStore {
    async fn append(&self, prediction: &Prediction) -> Result<i64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open prediction transaction")?;

        // Dropping `tx` on error rolls the insert back.
        let result = sqlx::query(
            r#"
            INSERT INTO predictions (game_type, period, color, confidence, safe, model, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(prediction.game_type.as_str())
        .bind(&prediction.period)
        .bind(prediction.color.as_str())
        .bind(prediction.confidence)
        .bind(prediction.safe)
        .bind(&prediction.model)
        .bind(prediction.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert prediction")?;

        tx.commit()
            .await
            .context("Failed to commit prediction")?;

        let id = result.last_insert_rowid();
        debug!(id, stream = %prediction.game_type, period = %prediction.period, "Prediction persisted");
        Ok(id)
    }

    async fn latest(&self, stream: &StreamId) -> Result<Option<Prediction>> {
        let row = sqlx::query("SELECT * FROM predictions WHERE game_type = ? ORDER BY id DESC LIMIT 1")
            .bind(stream.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query latest prediction")?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn history(&self, stream: &StreamId, limit: usize) -> Result<Vec<Prediction>> {
        let rows = sqlx::query("SELECT * FROM predictions WHERE game_type = ? ORDER BY id DESC LIMIT ?")
            .bind(stream.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query prediction history")?;
        rows.iter().map(Self::map_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_url() -> (String, std::path::PathBuf) {
        let mut p = std::env::temp_dir();
        p.push(format!("wingo_test_{}", uuid::Uuid::new_v4()));
        let file = p.join("predictions.db");
        (format!("sqlite://{}", file.display()), p)
    }

    fn prediction(stream: &str, period: &str, confidence: f64) -> Prediction {
        Prediction::new(
            StreamId::new(stream),
            period.into(),
            Color::Green,
            confidence,
            0.8,
            format!("ensemble_rf_{stream}@20240101T000000Z"),
        )
    }

    #[tokio::test]
    async fn test_append_and_latest() {
        let (url, dir) = temp_url();
        let store = SqlitePredictionStore::connect(&url).await.unwrap();

        let first = store.append(&prediction("1min", "100", 0.5)).await.unwrap();
        let second = store.append(&prediction("1min", "101", 0.9)).await.unwrap();
        assert!(second > first);

        let latest = store.latest(&StreamId::new("1min")).await.unwrap().unwrap();
        assert_eq!(latest.id, Some(second));
        assert_eq!(latest.period, "101");
        assert_eq!(latest.color, Color::Green);
        assert!(latest.safe);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let (url, dir) = temp_url();
        let store = SqlitePredictionStore::connect(&url).await.unwrap();

        let mut original = prediction("3min", "20240101300", 0.8125);
        original.id = Some(store.append(&original).await.unwrap());
        let loaded = store.latest(&StreamId::new("3min")).await.unwrap().unwrap();
        assert_eq!(loaded, original);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_latest_empty_stream() {
        let store = SqlitePredictionStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.latest(&StreamId::new("5min")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_newest_first_and_scoped_by_stream() {
        let store = SqlitePredictionStore::connect("sqlite::memory:").await.unwrap();
        for i in 0..5 {
            store.append(&prediction("30sec", &format!("{i}"), 0.4)).await.unwrap();
        }
        store.append(&prediction("1min", "900", 0.4)).await.unwrap();

        let history = store.history(&StreamId::new("30sec"), 3).await.unwrap();
        let periods: Vec<&str> = history.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["4", "3", "2"]);

        let other = store.history(&StreamId::new("1min"), 10).await.unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_records() {
        let (url, dir) = temp_url();
        {
            let store = SqlitePredictionStore::connect(&url).await.unwrap();
            store.append(&prediction("1min", "1", 0.3)).await.unwrap();
        }
        let store = SqlitePredictionStore::connect(&url).await.unwrap();
        assert_eq!(store.history(&StreamId::new("1min"), 10).await.unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}
