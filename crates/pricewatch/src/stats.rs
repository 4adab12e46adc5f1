//! Summary statistics over a price sample.

use crate::normalize::PriceSample;
use serde::{Deserialize, Serialize};

/// Count, mean, median, extremes and a sorted view of a sample.
///
/// An empty sample yields all-zero numbers and `count == 0`; that is a valid
/// "found nothing" result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStatistics {
    pub count: usize,
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub sorted: Vec<f64>,
}

impl PriceStatistics {
    /// Statistics over a normalized sample.
    pub fn from_sample(sample: &PriceSample) -> Self {
        Self::from_values(sample.values())
    }

    /// Statistics over raw values; all zeros when empty.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let average = sorted.iter().sum::<f64>() / count as f64;
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        let min = sorted[0];
        let max = sorted[count - 1];

        Self {
            count,
            average,
            median,
            min,
            max,
            range: max - min,
            sorted,
        }
    }
}
