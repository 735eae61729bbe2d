use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::metrics::ErrorStatistics;
use crate::period::Period;

/// What a fitted model says about its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Importances {
    /// Elastic net coefficients on the input feature scale.
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    /// Normalized impurity decrease per feature, summing to 1 unless no split was made.
    Trees { feature_importances: Vec<f64> },
}

/// Outcome of fitting one configuration and predicting its target period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub target: Period,
    pub train_rows: usize,
    pub test_rows: usize,
    pub actuals: Vec<f64>,
    pub predictions: Vec<f64>,
    pub stats: ErrorStatistics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importances: Option<Importances>,
}

/// One checkpoint log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub config: ModelConfig,
    pub result: EvaluationResult,
}

impl SweepRecord {
    pub fn new(config: ModelConfig, result: EvaluationResult) -> Self {
        Self { config, result }
    }
}
