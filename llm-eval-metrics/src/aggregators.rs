use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Spread of a set of percentages (typically one per run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub mean: Decimal,
    pub median: Decimal,
    pub std_dev: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub count: usize,
    pub sum: Decimal,
}

pub struct MetricAggregator;

impl MetricAggregator {
    pub fn aggregate(values: &[f64]) -> AggregatedMetrics {
        if values.is_empty() {
            return Self::empty();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = values.iter().sum();
        let mean = sum / values.len() as f64;
        let median = Self::median(&sorted);
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let std_dev = variance.sqrt();

        AggregatedMetrics {
            mean: Decimal::try_from(mean).unwrap_or_default(),
            median: Decimal::try_from(median).unwrap_or_default(),
            std_dev: Decimal::try_from(std_dev).unwrap_or_default(),
            min: Decimal::try_from(sorted[0]).unwrap_or_default(),
            max: Decimal::try_from(sorted[sorted.len() - 1]).unwrap_or_default(),
            count: values.len(),
            sum: Decimal::try_from(sum).unwrap_or_default(),
        }
    }

    fn median(sorted: &[f64]) -> f64 {
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    fn empty() -> AggregatedMetrics {
        AggregatedMetrics {
            mean: Decimal::ZERO,
            median: Decimal::ZERO,
            std_dev: Decimal::ZERO,
            min: Decimal::ZERO,
            max: Decimal::ZERO,
            count: 0,
            sum: Decimal::ZERO,
        }
    }
}
