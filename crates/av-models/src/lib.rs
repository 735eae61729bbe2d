//! Fit/predict capability used by the sweep driver.
//!
//! [`ModelFitter`] turns a configuration and a training window into a
//! [`FittedModel`]; the model then predicts the test window. Every source of
//! randomness is derived from the [`RunSetup`] passed into `fit`, so two fits
//! of the same configuration on the same rows are identical and fits of
//! different configurations may run on different threads.

pub mod boosting;
pub mod forest;
pub mod linear;
mod matrix;
mod tree;

pub use boosting::GradientBoosting;
pub use forest::RandomForest;
pub use linear::ElasticNet;

use av_data::Sample;
use av_types::{AvResult, Importances, ModelConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration-independent run setup shared by every fit of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSetup {
    pub seed: u64,
}

impl RunSetup {
    pub const DEFAULT_SEED: u64 = 123;

    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Fresh generator for one fit. Each fit starts from the seed, never from
    /// state left behind by another fit.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for RunSetup {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

/// A trained model.
pub trait FittedModel: Send {
    /// Predictions for `test`, in order, or `None` if the model cannot
    /// produce a finite prediction for every sample.
    fn predict(&self, test: &[Sample]) -> Option<Vec<f64>>;

    fn importances(&self) -> Option<Importances> {
        None
    }
}

/// Something that can fit a model for any configuration.
pub trait ModelFitter: Send + Sync {
    fn fit(
        &self,
        config: &ModelConfig,
        train: &[Sample],
        setup: &RunSetup,
    ) -> AvResult<Box<dyn FittedModel>>;
}

/// Dispatches each family to its reference implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFitter;

impl ModelFitter for DefaultFitter {
    fn fit(
        &self,
        config: &ModelConfig,
        train: &[Sample],
        setup: &RunSetup,
    ) -> AvResult<Box<dyn FittedModel>> {
        let model: Box<dyn FittedModel> = match config {
            ModelConfig::Linear(c) => Box::new(ElasticNet::fit(c, train)?),
            ModelConfig::RandomForest(c) => Box::new(RandomForest::fit(c, train, setup)?),
            ModelConfig::BoostedTrees(c) => Box::new(GradientBoosting::fit(c, train, setup)?),
        };
        Ok(model)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use av_data::Sample;
    use av_types::Period;

    /// price = 1000 + 50 * rooms + 2 * size, with a feature that carries no signal.
    pub fn linear_samples(n: usize) -> Vec<Sample> {
        let period = Period::new(2007, 1).unwrap();
        (0..n)
            .map(|i| {
                let rooms = (i % 5 + 1) as f64;
                let size = (100 + (i * 37) % 400) as f64;
                let noise = ((i * 7) % 3) as f64;
                Sample::new(period, 1000.0 + 50.0 * rooms + 2.0 * size, vec![rooms, size, noise])
            })
            .collect()
    }

    /// price jumps when the first feature crosses 5.
    pub fn step_samples(n: usize) -> Vec<Sample> {
        let period = Period::new(2007, 1).unwrap();
        (0..n)
            .map(|i| {
                let x = (i % 10) as f64;
                let y = if x < 5.0 { 100.0 } else { 300.0 };
                Sample::new(period, y, vec![x, ((i * 3) % 7) as f64])
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_types::{BoostedTreesConfig, LinearConfig, Loss, MaxFeatures, RandomForestConfig, Units};

    fn configs() -> Vec<ModelConfig> {
        vec![
            LinearConfig {
                lookback_periods: 1,
                x_units: Units::Natural,
                y_units: Units::Natural,
                alpha: 0.01.into(),
                l1_ratio: 0.5.into(),
            }
            .into(),
            RandomForestConfig {
                lookback_periods: 1,
                n_estimators: 10,
                max_features: MaxFeatures::Sqrt,
                max_depth: Some(3),
            }
            .into(),
            BoostedTreesConfig {
                lookback_periods: 1,
                n_estimators: 10,
                max_features: MaxFeatures::All,
                max_depth: Some(3),
                loss: Loss::LeastSquares,
                learning_rate: 0.1.into(),
            }
            .into(),
        ]
    }

    #[test]
    fn default_fitter_handles_every_family() {
        let train = test_support::linear_samples(60);
        let test = test_support::linear_samples(10);
        let setup = RunSetup::default();

        for config in configs() {
            let model = DefaultFitter.fit(&config, &train, &setup).unwrap();
            let predictions = model.predict(&test).unwrap();
            assert_eq!(predictions.len(), test.len(), "{config}");
            assert!(model.importances().is_some(), "{config}");
        }
    }

    #[test]
    fn fits_are_deterministic_for_a_seed() {
        let train = test_support::linear_samples(60);
        let test = test_support::linear_samples(10);
        let setup = RunSetup::new(7);

        for config in configs() {
            let a = DefaultFitter.fit(&config, &train, &setup).unwrap().predict(&test);
            let b = DefaultFitter.fit(&config, &train, &setup).unwrap().predict(&test);
            assert_eq!(a, b, "{config}");
        }
    }

    #[test]
    fn empty_training_window_fails() {
        for config in configs() {
            assert!(DefaultFitter.fit(&config, &[], &RunSetup::default()).is_err());
        }
    }
}
