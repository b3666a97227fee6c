//! Feature engineering over time-ordered outcome sequences.
//!
//! `build_features` is a pure transform: sorted outcome records in,
//! fixed-width feature vectors plus next-colour labels out. It holds no
//! state between calls, so it is safe to call from any stream concurrently.
//!
//! Row layout (see [`FEATURE_NAMES`]):
//! - current number and colour index
//! - previous 5 colours and numbers
//! - per-colour streaks (reset to 0 on change)
//! - colour counts in the trailing 10 rows
//! - parity and big/small flags with their streaks (restart at 1 on change)
//! - 5- and 10-row moving averages
//! - first and second backward differences

pub mod signals;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::types::{compare_issues, Color, OutcomeRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How many prior draws contribute lag features.
pub const LAG_DEPTH: usize = 5;

/// Trailing window for colour frequency counts.
pub const FREQUENCY_WINDOW: usize = 10;

pub const SHORT_MA_WINDOW: usize = 5;
pub const LONG_MA_WINDOW: usize = 10;

pub const FEATURE_COUNT: usize = 26;

/// Column names, in vector order. Persisted with each model so a schema
/// change forces retraining instead of silently mis-aligned predictions.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "number",
    "color_encoded",
    "prev_color_1",
    "prev_number_1",
    "prev_color_2",
    "prev_number_2",
    "prev_color_3",
    "prev_number_3",
    "prev_color_4",
    "prev_number_4",
    "prev_color_5",
    "prev_number_5",
    "streak_red",
    "streak_green",
    "streak_violet",
    "freq_red_last10",
    "freq_green_last10",
    "freq_violet_last10",
    "is_even",
    "parity_streak",
    "is_big",
    "big_streak",
    "ma_5",
    "ma_10",
    "delta_1",
    "delta_2",
];

/// Tunables that change feature values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// A number strictly above this is "big".
    pub big_threshold: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { big_threshold: 4.0 }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Derived features for one issue.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub issue_number: String,
    pub values: [f64; FEATURE_COUNT],
}

/// Result of [`build_features`].
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    /// Fully-defined rows that have a successor, in issue order.
    pub rows: Vec<FeatureVector>,
    /// `labels[i]` is the colour of the draw after `rows[i]`.
    pub labels: Vec<Color>,
    /// The most recent draw's features: the live prediction input.
    /// `None` only when that draw has an undefined feature.
    pub latest: Option<FeatureVector>,
}

impl FeatureSet {
    /// Number of labelled examples.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn examples(&self) -> impl Iterator<Item = (&FeatureVector, Color)> {
        self.rows.iter().zip(self.labels.iter().copied())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Derive feature vectors and next-colour labels from an outcome sequence.
///
/// The input is stably re-sorted by issue. Rows with any undefined feature
/// are dropped; the final record is never labelled and is returned as
/// [`FeatureSet::latest`] instead.
pub fn build_features(records: &[OutcomeRecord], config: &FeatureConfig) -> FeatureSet {
    let mut sorted: Vec<&OutcomeRecord> = records.iter().collect();
    sorted.sort_by(|a, b| issue_order(a, b));

    let n = sorted.len();
    if n == 0 {
        return FeatureSet::default();
    }

    let colors: Vec<Color> = sorted.iter().map(|r| r.color).collect();
    let numbers: Vec<Option<f64>> = sorted
        .iter()
        .map(|r| r.number.filter(|v| v.is_finite()))
        .collect();
    let color_index: Vec<Option<f64>> = colors.iter().map(|c| Some(c.index() as f64)).collect();

    let prev_colors: Vec<Vec<Option<f64>>> =
        (1..=LAG_DEPTH).map(|k| signals::lag(&color_index, k)).collect();
    let prev_numbers: Vec<Vec<Option<f64>>> =
        (1..=LAG_DEPTH).map(|k| signals::lag(&numbers, k)).collect();

    let streaks: Vec<Vec<u32>> = Color::ALL
        .iter()
        .map(|&c| signals::color_streaks(&colors, c))
        .collect();
    let frequencies: Vec<Vec<Option<f64>>> = Color::ALL
        .iter()
        .map(|&c| signals::rolling_count(&colors, c, FREQUENCY_WINDOW))
        .collect();

    let parity: Vec<Option<bool>> = numbers.iter().map(|v| v.map(|x| x % 2.0 == 0.0)).collect();
    let size: Vec<Option<bool>> = numbers
        .iter()
        .map(|v| v.map(|x| x > config.big_threshold))
        .collect();
    let parity_streak = signals::class_streaks(&parity);
    let size_streak = signals::class_streaks(&size);

    let ma_short = signals::rolling_mean(&numbers, SHORT_MA_WINDOW);
    let ma_long = signals::rolling_mean(&numbers, LONG_MA_WINDOW);
    let delta_1 = signals::first_difference(&numbers);
    let delta_2 = signals::second_difference(&numbers);

    let flag = |v: Option<bool>| v.map(|b| if b { 1.0 } else { 0.0 });
    let count = |v: Option<u32>| v.map(f64::from);

    let mut set = FeatureSet::default();
    for i in 0..n {
        let cells: [Option<f64>; FEATURE_COUNT] = [
            numbers[i],
            color_index[i],
            prev_colors[0][i],
            prev_numbers[0][i],
            prev_colors[1][i],
            prev_numbers[1][i],
            prev_colors[2][i],
            prev_numbers[2][i],
            prev_colors[3][i],
            prev_numbers[3][i],
            prev_colors[4][i],
            prev_numbers[4][i],
            Some(f64::from(streaks[0][i])),
            Some(f64::from(streaks[1][i])),
            Some(f64::from(streaks[2][i])),
            frequencies[0][i],
            frequencies[1][i],
            frequencies[2][i],
            flag(parity[i]),
            count(parity_streak[i]),
            flag(size[i]),
            count(size_streak[i]),
            ma_short[i],
            ma_long[i],
            delta_1[i],
            delta_2[i],
        ];

        let Some(values) = all_defined(cells) else {
            continue;
        };
        let vector = FeatureVector {
            issue_number: sorted[i].issue_number.clone(),
            values,
        };

        if i + 1 == n {
            set.latest = Some(vector);
        } else {
            set.rows.push(vector);
            set.labels.push(colors[i + 1]);
        }
    }

    set
}

fn issue_order(a: &OutcomeRecord, b: &OutcomeRecord) -> Ordering {
    compare_issues(&a.issue_number, &b.issue_number)
}

fn all_defined(cells: [Option<f64>; FEATURE_COUNT]) -> Option<[f64; FEATURE_COUNT]> {
    let mut out = [0.0; FEATURE_COUNT];
    for (slot, cell) in out.iter_mut().zip(cells) {
        *slot = cell?;
    }
    Some(out)
}

/// Position of a named column in [`FEATURE_NAMES`].
pub fn column(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|&n| n == name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
