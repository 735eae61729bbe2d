//! Hyperparameter axes: the allowed values of every hyperparameter, per family.

use av_types::{config_error, AvResult, Loss, MaxFeatures, ModelFamily, Scalar, SweepError, Units};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::path::Path;

/// Axes shared by every family plus one block per family.
///
/// Any block or field omitted from a JSON axes file keeps its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchAxes {
    /// Training window lengths, in periods.
    pub lookback_periods: Vec<u32>,
    pub linear: LinearAxes,
    /// Shared by the random forest and boosted trees families.
    pub trees: TreeAxes,
    /// Boosted-trees only.
    pub boosting: BoostingAxes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearAxes {
    pub x_units: Vec<Units>,
    pub y_units: Vec<Units>,
    pub alpha: Vec<f64>,
    pub l1_ratio: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeAxes {
    pub n_estimators: Vec<u32>,
    pub max_features: Vec<MaxFeatures>,
    /// `null` means unlimited depth.
    pub max_depth: Vec<Option<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoostingAxes {
    pub loss: Vec<Loss>,
    pub learning_rate: Vec<f64>,
}

impl Default for SearchAxes {
    fn default() -> Self {
        Self {
            lookback_periods: vec![1, 2, 3, 6, 12],
            linear: LinearAxes::default(),
            trees: TreeAxes::default(),
            boosting: BoostingAxes::default(),
        }
    }
}

impl Default for LinearAxes {
    fn default() -> Self {
        Self {
            x_units: vec![Units::Natural, Units::Log],
            y_units: vec![Units::Natural, Units::Log],
            alpha: vec![0.01, 0.03, 0.1, 0.3, 1.0],
            l1_ratio: vec![0.0, 0.25, 0.50, 0.75, 1.0],
        }
    }
}

impl Default for TreeAxes {
    fn default() -> Self {
        Self {
            n_estimators: vec![10, 30, 100, 300],
            max_features: vec![
                MaxFeatures::Count(1),
                MaxFeatures::Log2,
                MaxFeatures::Sqrt,
                MaxFeatures::All,
            ],
            max_depth: vec![Some(1), Some(3), Some(10), Some(30), Some(100), Some(300)],
        }
    }
}

impl Default for BoostingAxes {
    fn default() -> Self {
        Self {
            loss: vec![Loss::LeastSquares],
            learning_rate: vec![0.10, 0.25, 0.50, 0.75, 0.99],
        }
    }
}

impl SearchAxes {
    /// One value per axis, for smoke runs.
    pub fn abbreviated() -> Self {
        Self {
            lookback_periods: vec![2],
            linear: LinearAxes {
                x_units: vec![Units::Natural],
                y_units: vec![Units::Natural],
                alpha: vec![0.1],
                l1_ratio: vec![0.5],
            },
            trees: TreeAxes {
                n_estimators: vec![10],
                max_features: vec![MaxFeatures::All],
                max_depth: vec![Some(3)],
            },
            boosting: BoostingAxes {
                loss: vec![Loss::LeastSquares],
                learning_rate: vec![0.1],
            },
        }
    }

    /// Load axes from a JSON file and validate them for every family.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> AvResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("Failed to read axes file {}: {}", path.display(), e))?;
        let axes: Self = serde_json::from_str(&text)
            .map_err(|e| config_error!("Invalid axes file {}: {}", path.display(), e))?;
        axes.validate(&ModelFamily::ALL)?;
        tracing::info!("Loaded search axes from {}", path.display());
        Ok(axes)
    }

    /// Check the axes that `families` draw from.
    pub fn validate(&self, families: &[ModelFamily]) -> AvResult<()> {
        check_axis("lookback_periods", &self.lookback_periods)?;
        if self.lookback_periods.contains(&0) {
            return Err(invalid("lookback_periods must be at least 1"));
        }

        for family in families {
            match family {
                ModelFamily::Linear => self.validate_linear()?,
                ModelFamily::RandomForest => self.validate_trees()?,
                ModelFamily::BoostedTrees => {
                    self.validate_trees()?;
                    self.validate_boosting()?;
                }
            }
        }
        Ok(())
    }

    fn validate_linear(&self) -> AvResult<()> {
        let axes = &self.linear;
        check_axis("linear.x_units", &axes.x_units)?;
        check_axis("linear.y_units", &axes.y_units)?;
        check_scalars("linear.alpha", &axes.alpha)?;
        check_scalars("linear.l1_ratio", &axes.l1_ratio)?;
        if axes.alpha.iter().any(|a| *a < 0.0) {
            return Err(invalid("linear.alpha must be non-negative"));
        }
        if axes.l1_ratio.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(invalid("linear.l1_ratio must lie in [0, 1]"));
        }
        Ok(())
    }

    fn validate_trees(&self) -> AvResult<()> {
        let axes = &self.trees;
        check_axis("trees.n_estimators", &axes.n_estimators)?;
        check_axis("trees.max_features", &axes.max_features)?;
        check_axis("trees.max_depth", &axes.max_depth)?;
        if axes.n_estimators.contains(&0) {
            return Err(invalid("trees.n_estimators must be at least 1"));
        }
        if axes.max_depth.contains(&Some(0)) {
            return Err(invalid("trees.max_depth must be at least 1 or null"));
        }
        Ok(())
    }

    fn validate_boosting(&self) -> AvResult<()> {
        let axes = &self.boosting;
        check_axis("boosting.loss", &axes.loss)?;
        check_scalars("boosting.learning_rate", &axes.learning_rate)?;
        if axes.learning_rate.iter().any(|r| *r <= 0.0) {
            return Err(invalid("boosting.learning_rate must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> av_types::AvError {
    SweepError::InvalidAxes {
        message: message.into(),
    }
    .into()
}

/// Non-empty and free of repeats.
fn check_axis<T: Eq + Hash>(name: &str, values: &[T]) -> AvResult<()> {
    if values.is_empty() {
        return Err(invalid(format!("{} has no values", name)));
    }
    let mut seen = HashSet::with_capacity(values.len());
    if !values.iter().all(|v| seen.insert(v)) {
        return Err(invalid(format!("{} repeats a value", name)));
    }
    Ok(())
}

fn check_scalars(name: &str, values: &[f64]) -> AvResult<()> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(invalid(format!("{} must be finite", name)));
    }
    let scalars: Vec<Scalar> = values.iter().map(|&v| Scalar::new(v)).collect();
    check_axis(name, &scalars)
}
