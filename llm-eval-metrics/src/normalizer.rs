//! Raw score to percentage conversion.
//!
//! Aggregation across test cases is weighted by each test case's declared
//! maximum: `Σ raw / Σ max × 100`. A mean of per-test percentages would let
//! a small-maximum test case count as much as a large one.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// One scored SubTask, reduced to the two numbers aggregation needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    pub raw_score: f64,
    pub max_score: f64,
}

impl ScoreSample {
    pub fn new(raw_score: f64, max_score: f64) -> Self {
        Self { raw_score, max_score }
    }

    fn clamped_raw(&self) -> f64 {
        self.raw_score.clamp(0.0, self.max_score.max(0.0))
    }
}

/// Rounds half away from zero to `dp` decimal places.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// `round((raw / max) × 100, 1)`, always within `[0, 100]`.
pub fn percentage(raw_score: f64, max_score: f64) -> f64 {
    if max_score <= 0.0 || !max_score.is_finite() || !raw_score.is_finite() {
        return 0.0;
    }
    let raw = raw_score.clamp(0.0, max_score);
    round_dp(raw / max_score * 100.0, 1)
}

/// Unrounded weighted percentage, or `None` when there is nothing to weigh.
pub fn weighted_percentage_exact(samples: &[ScoreSample]) -> Option<f64> {
    let total_max: f64 = samples.iter().map(|s| s.max_score.max(0.0)).sum();
    if samples.is_empty() || total_max <= 0.0 {
        return None;
    }
    let total_raw: f64 = samples.iter().map(ScoreSample::clamped_raw).sum();
    Some(total_raw / total_max * 100.0)
}

/// `round(Σ raw / Σ max × 100, 1)`.
pub fn weighted_percentage(samples: &[ScoreSample]) -> Option<f64> {
    weighted_percentage_exact(samples).map(|p| round_dp(p, 1))
}

/// Arithmetic mean of per-run weighted percentages, rounded to one decimal.
pub fn overall_across_runs(run_percentages: &[f64]) -> Option<f64> {
    if run_percentages.is_empty() {
        return None;
    }
    let mean = run_percentages.iter().sum::<f64>() / run_percentages.len() as f64;
    Some(round_dp(mean, 1))
}
