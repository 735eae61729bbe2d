//! Gradient-boosted regression trees.
//!
//! Each stage fits a tree to the negative gradient of the loss, then
//! re-estimates every leaf with the loss-specific optimum (mean, median,
//! Huber M-estimate or quantile) before adding it with the learning rate.

use av_data::Sample;
use av_types::{median, AvResult, BoostedTreesConfig, Importances, Loss, ModelError};
use std::collections::HashMap;

use crate::matrix::{finite, quantile, shape_matches, Design};
use crate::tree::{normalize, RegressionTree, TreeParams};
use crate::{FittedModel, RunSetup};

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    stages: Vec<RegressionTree>,
    n_features: usize,
}

impl GradientBoosting {
    pub fn fit(config: &BoostedTreesConfig, train: &[Sample], setup: &RunSetup) -> AvResult<Self> {
        let design = Design::from_samples(train)?;
        let learning_rate = config.learning_rate.get();
        if learning_rate.is_nan() || learning_rate <= 0.0 {
            return Err(ModelError::Fitting {
                message: format!("learning rate must be positive, got {}", learning_rate),
            }
            .into());
        }

        let params = TreeParams {
            max_depth: config.max_depth,
            max_features: config.max_features.resolve(design.n_features),
            min_samples_split: 2,
        };
        let loss = config.loss;
        let y = &design.targets;
        let n = design.len();

        let init = initial_estimate(loss, y);
        let mut current = vec![init; n];
        let mut rng = setup.rng();
        let mut stages = Vec::with_capacity(config.n_estimators as usize);

        for _ in 0..config.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, f)| t - f).collect();
            let delta = huber_delta(loss, &residuals);
            let gradient: Vec<f64> = residuals
                .iter()
                .map(|&r| negative_gradient(loss, r, delta))
                .collect();

            let mut tree = RegressionTree::fit(&design.rows, &gradient, (0..n).collect(), &params, &mut rng);

            if loss != Loss::LeastSquares {
                let mut by_leaf: HashMap<usize, Vec<f64>> = HashMap::new();
                for (row, r) in design.rows.iter().zip(&residuals) {
                    by_leaf.entry(tree.leaf_of(row)).or_default().push(*r);
                }
                for (leaf, mut values) in by_leaf {
                    tree.set_leaf_value(leaf, leaf_estimate(loss, &mut values, delta));
                }
            }

            for (f, row) in current.iter_mut().zip(&design.rows) {
                *f += learning_rate * tree.predict_row(row);
            }
            stages.push(tree);
        }

        Ok(Self {
            init,
            learning_rate,
            stages,
            n_features: design.n_features,
        })
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }
}

impl FittedModel for GradientBoosting {
    fn predict(&self, test: &[Sample]) -> Option<Vec<f64>> {
        if !shape_matches(test, self.n_features) {
            return None;
        }
        let predictions = test
            .iter()
            .map(|s| {
                self.init
                    + self.learning_rate
                        * self
                            .stages
                            .iter()
                            .map(|t| t.predict_row(&s.features))
                            .sum::<f64>()
            })
            .collect();
        finite(predictions)
    }

    fn importances(&self) -> Option<Importances> {
        let mut totals = vec![0.0; self.n_features];
        for stage in &self.stages {
            for (total, v) in totals.iter_mut().zip(stage.normalized_importances()) {
                *total += v;
            }
        }
        Some(Importances::Trees {
            feature_importances: normalize(totals),
        })
    }
}

fn initial_estimate(loss: Loss, y: &[f64]) -> f64 {
    let mut values = y.to_vec();
    match loss {
        Loss::LeastSquares => y.iter().sum::<f64>() / y.len() as f64,
        Loss::LeastAbsoluteDeviation | Loss::Huber => median(&mut values).unwrap_or(0.0),
        Loss::Quantile => quantile(&mut values, loss.alpha().unwrap_or(0.5)).unwrap_or(0.0),
    }
}

/// Huber transition point: the `alpha` quantile of absolute residuals.
fn huber_delta(loss: Loss, residuals: &[f64]) -> f64 {
    match loss {
        Loss::Huber => {
            let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
            quantile(&mut abs, loss.alpha().unwrap_or(0.9)).unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

fn negative_gradient(loss: Loss, residual: f64, delta: f64) -> f64 {
    match loss {
        Loss::LeastSquares => residual,
        Loss::LeastAbsoluteDeviation => sign(residual),
        Loss::Huber => {
            if residual.abs() <= delta {
                residual
            } else {
                delta * sign(residual)
            }
        }
        Loss::Quantile => {
            let alpha = loss.alpha().unwrap_or(0.5);
            if residual > 0.0 {
                alpha
            } else {
                alpha - 1.0
            }
        }
    }
}

fn leaf_estimate(loss: Loss, residuals: &mut [f64], delta: f64) -> f64 {
    match loss {
        Loss::LeastSquares => residuals.iter().sum::<f64>() / residuals.len() as f64,
        Loss::LeastAbsoluteDeviation => median(residuals).unwrap_or(0.0),
        Loss::Huber => {
            let center = median(residuals).unwrap_or(0.0);
            let shift = residuals
                .iter()
                .map(|r| sign(r - center) * (r - center).abs().min(delta))
                .sum::<f64>()
                / residuals.len() as f64;
            center + shift
        }
        Loss::Quantile => quantile(residuals, loss.alpha().unwrap_or(0.5)).unwrap_or(0.0),
    }
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{linear_samples, step_samples};
    use av_types::MaxFeatures;

    fn config(loss: Loss, n_estimators: u32, learning_rate: f64) -> BoostedTreesConfig {
        BoostedTreesConfig {
            lookback_periods: 1,
            n_estimators,
            max_features: MaxFeatures::All,
            max_depth: Some(3),
            loss,
            learning_rate: learning_rate.into(),
        }
    }

    fn rmse(model: &GradientBoosting, samples: &[Sample]) -> f64 {
        let predictions = model.predict(samples).unwrap();
        let sse: f64 = predictions
            .iter()
            .zip(samples)
            .map(|(p, s)| (p - s.price).powi(2))
            .sum();
        (sse / samples.len() as f64).sqrt()
    }

    #[test]
    fn every_loss_improves_on_the_initial_estimate() {
        let train = step_samples(100);
        for loss in [Loss::LeastSquares, Loss::LeastAbsoluteDeviation, Loss::Huber, Loss::Quantile] {
            let zero = GradientBoosting::fit(&config(loss, 0, 0.5), &train, &RunSetup::default()).unwrap();
            let boosted = GradientBoosting::fit(&config(loss, 20, 0.5), &train, &RunSetup::default()).unwrap();
            assert_eq!(zero.n_stages(), 0);
            assert!(rmse(&boosted, &train) < rmse(&zero, &train) / 2.0, "{loss}");
        }
    }

    #[test]
    fn least_squares_approaches_the_targets() {
        let train = linear_samples(80);
        let model = GradientBoosting::fit(&config(Loss::LeastSquares, 200, 0.5), &train, &RunSetup::default()).unwrap();
        assert!(rmse(&model, &train) < 25.0);
    }

    #[test]
    fn non_positive_learning_rate_fails() {
        let train = step_samples(10);
        assert!(GradientBoosting::fit(&config(Loss::LeastSquares, 5, 0.0), &train, &RunSetup::default()).is_err());
    }

    #[test]
    fn leaf_estimates_match_their_loss() {
        let mut values = vec![1.0, 2.0, 10.0];
        assert_eq!(leaf_estimate(Loss::LeastAbsoluteDeviation, &mut values, 0.0), 2.0);
        let mut values = vec![1.0, 2.0, 3.0];
        assert_eq!(leaf_estimate(Loss::LeastSquares, &mut values, 0.0), 2.0);
        assert_eq!(negative_gradient(Loss::Huber, 5.0, 2.0), 2.0);
        assert_eq!(negative_gradient(Loss::Quantile, -1.0, 0.0), -0.5);
    }
}
