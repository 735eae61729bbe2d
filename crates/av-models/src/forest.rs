//! Random forest: bootstrapped CART trees with per-split feature sampling.

use av_data::Sample;
use av_types::{AvResult, Importances, RandomForestConfig};
use rand::Rng;

use crate::matrix::{finite, shape_matches, Design};
use crate::tree::{normalize, RegressionTree, TreeParams};
use crate::{FittedModel, RunSetup};

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(config: &RandomForestConfig, train: &[Sample], setup: &RunSetup) -> AvResult<Self> {
        let design = Design::from_samples(train)?;
        let n = design.len();
        let params = TreeParams {
            max_depth: config.max_depth,
            max_features: config.max_features.resolve(design.n_features),
            min_samples_split: 2,
        };

        let mut rng = setup.rng();
        let trees = (0..config.n_estimators.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(&design.rows, &design.targets, bootstrap, &params, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            n_features: design.n_features,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl FittedModel for RandomForest {
    fn predict(&self, test: &[Sample]) -> Option<Vec<f64>> {
        if !shape_matches(test, self.n_features) {
            return None;
        }
        let k = self.trees.len() as f64;
        let predictions = test
            .iter()
            .map(|s| self.trees.iter().map(|t| t.predict_row(&s.features)).sum::<f64>() / k)
            .collect();
        finite(predictions)
    }

    fn importances(&self) -> Option<Importances> {
        let mut totals = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (total, v) in totals.iter_mut().zip(tree.normalized_importances()) {
                *total += v;
            }
        }
        Some(Importances::Trees {
            feature_importances: normalize(totals),
        })
    }
}
