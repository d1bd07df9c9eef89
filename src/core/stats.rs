//! Summary statistics over latency samples.
//!
//! Pure functions over `&[f64]`. Every function is total: an empty slice
//! yields `0.0` (or [`Trend::Unknown`]) instead of `NaN`.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Number of most recent samples the trend is computed over.
pub const TREND_WINDOW: usize = 10;

/// Relative change (percent) between half-window means that counts as a trend.
const TREND_CHANGE_PCT: f64 = 10.0;

/// Direction of recent latency movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    /// Fewer than [`TREND_WINDOW`] samples
    Unknown,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::mean(values)
}

/// Median via sort-and-midpoint; even lengths average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population variance (mean squared deviation from the mean).
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::population_variance(values)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

pub fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::min(values)
}

pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::max(values)
}

/// Mean of the last `window` values (all of them if fewer exist).
pub fn moving_average(values: &[f64], window: usize) -> f64 {
    let start = values.len().saturating_sub(window);
    mean(&values[start..])
}

/// Classify the trend of the most recent [`TREND_WINDOW`] values.
///
/// The window is split into an older and a newer half; the relative change
/// of the newer mean against the older mean decides the direction. A zero
/// older mean has no defined ratio and is reported as stable.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < TREND_WINDOW {
        return Trend::Unknown;
    }

    let recent = &values[values.len() - TREND_WINDOW..];
    let (older, newer) = recent.split_at(TREND_WINDOW / 2);
    let first_half = mean(older);
    let second_half = mean(newer);

    if first_half == 0.0 {
        return Trend::Stable;
    }

    let change = (second_half - first_half) / first_half * 100.0;
    if change > TREND_CHANGE_PCT {
        Trend::Increasing
    } else if change < -TREND_CHANGE_PCT {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Round to the given number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
