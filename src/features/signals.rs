//! Per-column signal builders.
//!
//! Each function maps a time-ordered column to a derived column of the
//! same length. `None` marks an undefined value (window not yet full, or a
//! missing input inside the window).

use crate::types::Color;

/// Consecutive rows of `target` ending at each row. Resets to 0 on the
/// first non-matching row.
pub fn color_streaks(colors: &[Color], target: Color) -> Vec<u32> {
    let mut current = 0u32;
    colors
        .iter()
        .map(|&c| {
            current = if c == target { current + 1 } else { 0 };
            current
        })
        .collect()
}

/// Consecutive rows sharing the same class, restarting at 1 whenever the
/// class changes. Rows without a class yield `None` and leave the running
/// streak untouched.
pub fn class_streaks<T: PartialEq + Copy>(classes: &[Option<T>]) -> Vec<Option<u32>> {
    let mut current = 0u32;
    let mut last: Option<T> = None;
    classes
        .iter()
        .map(|class| {
            let class = (*class)?;
            current = if last == Some(class) { current + 1 } else { 1 };
            last = Some(class);
            Some(current)
        })
        .collect()
}

/// Occurrences of `target` in the trailing `window` rows, undefined until
/// `window` rows are available.
pub fn rolling_count(colors: &[Color], target: Color, window: usize) -> Vec<Option<f64>> {
    (0..colors.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let hits = colors[i + 1 - window..=i].iter().filter(|&&c| c == target).count();
            Some(hits as f64)
        })
        .collect()
}

/// Simple moving average over the trailing `window` rows. Undefined until
/// the window is full, or when any value inside it is missing.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                return None;
            }
            let mut sum = 0.0;
            for v in &values[i + 1 - window..=i] {
                sum += (*v)?;
            }
            Some(sum / window as f64)
        })
        .collect()
}

/// The value `k` rows back.
pub fn lag<T: Copy>(values: &[Option<T>], k: usize) -> Vec<Option<T>> {
    (0..values.len())
        .map(|i| if i >= k { values[i - k] } else { None })
        .collect()
}

/// First-order backward difference: `x[i] - x[i-1]`.
pub fn first_difference(values: &[Option<f64>]) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i < 1 {
                return None;
            }
            Some(values[i]? - values[i - 1]?)
        })
        .collect()
}

/// Second-order backward difference: `x[i] - 2·x[i-1] + x[i-2]`.
pub fn second_difference(values: &[Option<f64>]) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i < 2 {
                return None;
            }
            Some(values[i]? - 2.0 * values[i - 1]? + values[i - 2]?)
        })
        .collect()
}
