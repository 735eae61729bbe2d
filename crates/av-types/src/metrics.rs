//! Point-prediction error statistics over one evaluation period.

use serde::{Deserialize, Serialize};

/// Accuracy of one configuration on one target period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub count: usize,
    pub rmse: f64,
    pub median_abs_error: f64,
    pub mean_abs_error: f64,
    /// Median of `|prediction - actual| / |actual|`, over rows with a non-zero actual.
    pub median_abs_relative_error: Option<f64>,
}

impl ErrorStatistics {
    /// Returns `None` when the slices are empty, differ in length, or contain
    /// a non-finite value.
    pub fn compute(actuals: &[f64], predictions: &[f64]) -> Option<Self> {
        if actuals.is_empty() || actuals.len() != predictions.len() {
            return None;
        }
        if actuals
            .iter()
            .chain(predictions.iter())
            .any(|v| !v.is_finite())
        {
            return None;
        }

        let errors: Vec<f64> = predictions
            .iter()
            .zip(actuals)
            .map(|(p, a)| p - a)
            .collect();
        let n = errors.len() as f64;

        let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
        let mut abs_errors: Vec<f64> = errors.iter().map(|e| e.abs()).collect();
        let mean_abs_error = abs_errors.iter().sum::<f64>() / n;
        let median_abs_error = median(&mut abs_errors)?;

        let mut relative: Vec<f64> = errors
            .iter()
            .zip(actuals)
            .filter(|(_, a)| **a != 0.0)
            .map(|(e, a)| (e / a).abs())
            .collect();
        let median_abs_relative_error = median(&mut relative);

        Some(Self {
            count: errors.len(),
            rmse,
            median_abs_error,
            mean_abs_error,
            median_abs_relative_error,
        })
    }
}

/// Median of finite values; sorts in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
