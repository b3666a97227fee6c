//! Shared types for the prediction service.
//!
//! These types form the data model used across all modules: stream
//! configuration, historical outcome records, predictions and the
//! domain error enum. Source, feature, model and engine modules all
//! depend on this file and never on each other's internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Identity of one independently-scheduled draw stream ("30sec", "1min", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Immutable configuration of a stream, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Game-type tag; also the artifact and database key.
    pub id: StreamId,
    /// Endpoint identifier on the history source (e.g. `WinGo_30S`).
    pub endpoint: String,
    /// Native polling interval in seconds.
    pub interval_secs: u64,
}

impl StreamConfig {
    pub fn new(id: &str, endpoint: &str, interval_secs: u64) -> Self {
        Self {
            id: StreamId::new(id),
            endpoint: endpoint.to_string(),
            interval_secs,
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// The four streams of the reference deployment.
    pub fn reference_set() -> Vec<StreamConfig> {
        vec![
            StreamConfig::new("30sec", "WinGo_30S", 30),
            StreamConfig::new("1min", "WinGo_1M", 60),
            StreamConfig::new("3min", "WinGo_3M", 180),
            StreamConfig::new("5min", "WinGo_5M", 300),
        ]
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} every {}s)", self.id, self.endpoint, self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// Categorical outcome of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl Color {
    /// All colours, in categorical-index order.
    pub const ALL: [Color; 3] = [Color::Red, Color::Green, Color::Violet];

    /// Fixed categorical index used inside feature vectors.
    pub fn index(self) -> usize {
        match self {
            Color::Red => 0,
            Color::Green => 1,
            Color::Violet => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "RED",
            Color::Green => "GREEN",
            Color::Violet => "VIOLET",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive parse. Compound source values such as `"green,violet"`
/// resolve to VIOLET.
impl std::str::FromStr for Color {
    type Err = PredictorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let mut resolved = None;
        for part in lower.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let color = match part {
                "red" => Color::Red,
                "green" => Color::Green,
                "violet" | "purple" => Color::Violet,
                _ => return Err(PredictorError::UnknownColor(s.to_string())),
            };
            resolved = match (resolved, color) {
                (_, Color::Violet) | (Some(Color::Violet), _) => Some(Color::Violet),
                (_, c) => Some(c),
            };
        }
        resolved.ok_or_else(|| PredictorError::UnknownColor(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Outcome records
// ---------------------------------------------------------------------------

/// One historical draw as produced by the history source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Monotonically increasing issue identifier.
    pub issue_number: String,
    /// Numeric outcome (0–9). `None` when the source value did not parse.
    pub number: Option<f64>,
    pub color: Color,
    /// When this process observed the record.
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(issue_number: impl Into<String>, number: Option<f64>, color: Color) -> Self {
        Self {
            issue_number: issue_number.into(),
            number,
            color,
            timestamp: Utc::now(),
        }
    }
}

/// Order two issue identifiers. All-digit identifiers compare numerically
/// (shorter is smaller); anything else falls back to plain string order.
pub fn compare_issues(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
    if numeric(a) && numeric(b) {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

/// The issue following `latest`, keeping its width. Falls back to the
/// current UNIX timestamp when the latest issue is unknown or not numeric.
pub fn next_period(latest: Option<&str>) -> String {
    latest
        .filter(|s| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit()))
        .and_then(|s| {
            let next = s.parse::<u128>().ok()?.checked_add(1)?;
            Some(format!("{next:0width$}", width = s.len()))
        })
        .unwrap_or_else(|| Utc::now().timestamp().to_string())
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// An emitted forecast. Serialised flat; this is also the notification
/// wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Row id once persisted. Not part of the wire format.
    #[serde(skip)]
    pub id: Option<i64>,
    pub game_type: StreamId,
    /// Issue being predicted for.
    pub period: String,
    pub color: Color,
    /// Probability mass of the top class, in [0, 1].
    pub confidence: f64,
    pub safe: bool,
    /// Tag of the model that produced this prediction.
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    pub fn new(
        game_type: StreamId,
        period: String,
        color: Color,
        confidence: f64,
        safe_threshold: f64,
        model: String,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        Self {
            id: None,
            game_type,
            period,
            color,
            confidence,
            safe: is_safe(confidence, safe_threshold),
            model,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] period {} → {} ({:.1}%{})",
            self.game_type,
            self.period,
            self.color,
            self.confidence * 100.0,
            if self.safe { ", safe" } else { "" },
        )
    }
}

/// Publish gate: inclusive at the threshold.
pub fn is_safe(confidence: f64, threshold: f64) -> bool {
    confidence >= threshold
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Result of one training run. Failure is reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
    pub success: bool,
    pub train_score: f64,
    pub test_score: f64,
    /// Labelled examples used (train + test).
    pub examples: usize,
    pub reason: Option<String>,
}

impl TrainingOutcome {
    pub fn trained(train_score: f64, test_score: f64, examples: usize) -> Self {
        Self {
            success: true,
            train_score,
            test_score,
            examples,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            train_score: 0.0,
            test_score: 0.0,
            examples: 0,
            reason: Some(reason.into()),
        }
    }
}

impl fmt::Display for TrainingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "trained on {} examples (train {:.3}, test {:.3})",
                self.examples, self.train_score, self.test_score
            )
        } else {
            write!(f, "failed: {}", self.reason.as_deref().unwrap_or("unknown"))
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("Unknown colour: {0}")]
    UnknownColor(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_parse_case_insensitive() {
        assert_eq!("RED".parse::<Color>().unwrap(), Color::Red);
        assert_eq!("green".parse::<Color>().unwrap(), Color::Green);
        assert_eq!(" Violet ".parse::<Color>().unwrap(), Color::Violet);
    }

    #[test]
    fn test_color_parse_compound_prefers_violet() {
        assert_eq!("green,violet".parse::<Color>().unwrap(), Color::Violet);
        assert_eq!("violet,red".parse::<Color>().unwrap(), Color::Violet);
    }

    #[test]
    fn test_color_parse_unknown() {
        assert!("blue".parse::<Color>().is_err());
        assert!("".parse::<Color>().is_err());
    }

    #[test]
    fn test_color_serde_uppercase() {
        assert_eq!(serde_json::to_string(&Color::Violet).unwrap(), "\"VIOLET\"");
        let c: Color = serde_json::from_str("\"GREEN\"").unwrap();
        assert_eq!(c, Color::Green);
    }

    #[test]
    fn test_compare_issues_numeric() {
        assert_eq!(compare_issues("99", "100"), Ordering::Less);
        assert_eq!(compare_issues("20240101001", "20240101002"), Ordering::Less);
        assert_eq!(compare_issues("007", "7"), Ordering::Equal);
        assert_eq!(compare_issues("b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_next_period_increments_and_keeps_width() {
        assert_eq!(next_period(Some("20240101100051234")), "20240101100051235");
        assert_eq!(next_period(Some("0099")), "0100");
    }

    #[test]
    fn test_next_period_fallback_is_timestamp() {
        let before = Utc::now().timestamp();
        let p: i64 = next_period(None).parse().unwrap();
        assert!(p >= before);
        let p: i64 = next_period(Some("abc")).parse().unwrap();
        assert!(p >= before);
    }

    #[test]
    fn test_is_safe_boundary_inclusive() {
        assert!(is_safe(0.80, 0.80));
        assert!(is_safe(0.95, 0.80));
        assert!(!is_safe(0.7999999, 0.80));
    }

    #[test]
    fn test_prediction_serializes_flat() {
        let p = Prediction::new(
            StreamId::new("1min"),
            "123".into(),
            Color::Red,
            0.85,
            0.80,
            "ensemble_rf_1min".into(),
        );
        let json: serde_json::Value = serde_json::to_value(&p).unwrap();
        assert_eq!(json["game_type"], "1min");
        assert_eq!(json["period"], "123");
        assert_eq!(json["color"], "RED");
        assert_eq!(json["safe"], true);
        assert_eq!(json["model"], "ensemble_rf_1min");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_prediction_clamps_confidence() {
        let p = Prediction::new(StreamId::new("x"), "1".into(), Color::Green, 1.2, 0.8, "m".into());
        assert_eq!(p.confidence, 1.0);
        assert!(p.safe);
    }

    #[test]
    fn test_reference_streams() {
        let streams = StreamConfig::reference_set();
        assert_eq!(streams.len(), 4);
        assert_eq!(streams[0].endpoint, "WinGo_30S");
        assert_eq!(streams[3].interval_secs, 300);
    }

    #[test]
    fn test_training_outcome_display() {
        assert!(format!("{}", TrainingOutcome::failed("too few")).contains("too few"));
        assert!(format!("{}", TrainingOutcome::trained(0.9, 0.5, 110)).contains("110"));
    }
}
