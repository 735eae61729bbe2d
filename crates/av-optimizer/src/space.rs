//! Lazy, deterministic enumeration of the configuration grid.

use av_types::{
    AvError, AvResult, BoostedTreesConfig, LinearConfig, ModelConfig, ModelFamily,
    RandomForestConfig, SweepError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::search::SearchAxes;

/// Which families a sweep covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilySelection {
    #[default]
    All,
    Only(ModelFamily),
}

impl FamilySelection {
    /// Selected families in generation order.
    pub fn families(&self) -> Vec<ModelFamily> {
        match self {
            FamilySelection::All => ModelFamily::ALL.to_vec(),
            FamilySelection::Only(family) => vec![*family],
        }
    }

    pub fn single(&self) -> Option<ModelFamily> {
        match self {
            FamilySelection::All => None,
            FamilySelection::Only(family) => Some(*family),
        }
    }
}

impl fmt::Display for FamilySelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FamilySelection::All => write!(f, "all"),
            FamilySelection::Only(family) => write!(f, "{}", family.short_tag()),
        }
    }
}

impl FromStr for FamilySelection {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(FamilySelection::All)
        } else {
            s.parse().map(FamilySelection::Only)
        }
    }
}

/// The full grid for a set of axes and a family selection.
///
/// Iteration is lazy and restartable: every call to [`iter`](Self::iter)
/// yields the same configurations in the same order. Within a family the
/// order is the nested loop over lookback, then the family's axes as declared.
#[derive(Debug, Clone)]
pub struct ConfigurationSpace {
    axes: SearchAxes,
    selection: FamilySelection,
}

impl ConfigurationSpace {
    pub fn new(axes: SearchAxes, selection: FamilySelection) -> AvResult<Self> {
        axes.validate(&selection.families())?;
        let space = Self { axes, selection };
        for family in selection.families() {
            if space.checked_family_len(family).is_none() {
                return Err(SweepError::InvalidAxes {
                    message: format!("grid for {} is too large to enumerate", family),
                }
                .into());
            }
        }
        Ok(space)
    }

    pub fn axes(&self) -> &SearchAxes {
        &self.axes
    }

    pub fn selection(&self) -> FamilySelection {
        self.selection
    }

    pub fn families(&self) -> Vec<ModelFamily> {
        self.selection.families()
    }

    /// Product of the axis cardinalities for `family`.
    pub fn family_len(&self, family: ModelFamily) -> usize {
        self.checked_family_len(family).unwrap_or(usize::MAX)
    }

    /// Total configurations across the selected families.
    pub fn len(&self) -> usize {
        self.families()
            .into_iter()
            .fold(0usize, |total, f| total.saturating_add(self.family_len(f)))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn checked_family_len(&self, family: ModelFamily) -> Option<usize> {
        let a = &self.axes;
        let dims: Vec<usize> = match family {
            ModelFamily::Linear => vec![
                a.linear.x_units.len(),
                a.linear.y_units.len(),
                a.linear.alpha.len(),
                a.linear.l1_ratio.len(),
            ],
            ModelFamily::RandomForest => vec![
                a.trees.n_estimators.len(),
                a.trees.max_features.len(),
                a.trees.max_depth.len(),
            ],
            ModelFamily::BoostedTrees => vec![
                a.trees.n_estimators.len(),
                a.trees.max_features.len(),
                a.trees.max_depth.len(),
                a.boosting.loss.len(),
                a.boosting.learning_rate.len(),
            ],
        };
        dims.into_iter()
            .try_fold(a.lookback_periods.len(), |acc, d| acc.checked_mul(d))
    }

    /// Every configuration of every selected family.
    pub fn iter(&self) -> impl Iterator<Item = ModelConfig> + '_ {
        self.families()
            .into_iter()
            .flat_map(move |family| self.iter_family(family))
    }

    /// Configurations of one family, whether or not it is selected.
    pub fn iter_family(&self, family: ModelFamily) -> Box<dyn Iterator<Item = ModelConfig> + '_> {
        match family {
            ModelFamily::Linear => Box::new(self.linear()),
            ModelFamily::RandomForest => Box::new(self.random_forest()),
            ModelFamily::BoostedTrees => Box::new(self.boosted_trees()),
        }
    }

    fn linear(&self) -> impl Iterator<Item = ModelConfig> + '_ {
        let a = &self.axes;
        a.lookback_periods.iter().flat_map(move |&lookback_periods| {
            a.linear.x_units.iter().flat_map(move |&x_units| {
                a.linear.y_units.iter().flat_map(move |&y_units| {
                    a.linear.alpha.iter().flat_map(move |&alpha| {
                        a.linear.l1_ratio.iter().map(move |&l1_ratio| {
                            ModelConfig::Linear(LinearConfig {
                                lookback_periods,
                                x_units,
                                y_units,
                                alpha: alpha.into(),
                                l1_ratio: l1_ratio.into(),
                            })
                        })
                    })
                })
            })
        })
    }

    fn random_forest(&self) -> impl Iterator<Item = ModelConfig> + '_ {
        let a = &self.axes;
        a.lookback_periods.iter().flat_map(move |&lookback_periods| {
            a.trees.n_estimators.iter().flat_map(move |&n_estimators| {
                a.trees.max_features.iter().flat_map(move |&max_features| {
                    a.trees.max_depth.iter().map(move |&max_depth| {
                        ModelConfig::RandomForest(RandomForestConfig {
                            lookback_periods,
                            n_estimators,
                            max_features,
                            max_depth,
                        })
                    })
                })
            })
        })
    }

    fn boosted_trees(&self) -> impl Iterator<Item = ModelConfig> + '_ {
        let a = &self.axes;
        a.lookback_periods.iter().flat_map(move |&lookback_periods| {
            a.trees.n_estimators.iter().flat_map(move |&n_estimators| {
                a.trees.max_features.iter().flat_map(move |&max_features| {
                    a.trees.max_depth.iter().flat_map(move |&max_depth| {
                        a.boosting.loss.iter().flat_map(move |&loss| {
                            a.boosting.learning_rate.iter().map(move |&learning_rate| {
                                ModelConfig::BoostedTrees(BoostedTreesConfig {
                                    lookback_periods,
                                    n_estimators,
                                    max_features,
                                    max_depth,
                                    loss,
                                    learning_rate: learning_rate.into(),
                                })
                            })
                        })
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_grid_cardinality() {
        let space = ConfigurationSpace::new(SearchAxes::default(), FamilySelection::All).unwrap();

        assert_eq!(space.family_len(ModelFamily::Linear), 5 * 2 * 2 * 5 * 5);
        assert_eq!(space.family_len(ModelFamily::RandomForest), 5 * 4 * 4 * 6);
        assert_eq!(space.family_len(ModelFamily::BoostedTrees), 5 * 4 * 4 * 6 * 5);
        assert_eq!(space.len(), 500 + 480 + 2400);
        assert_eq!(space.iter().count(), space.len());
    }

    #[test]
    fn no_duplicate_keys() {
        let space = ConfigurationSpace::new(SearchAxes::default(), FamilySelection::All).unwrap();
        let keys: HashSet<ModelConfig> = space.iter().collect();
        assert_eq!(keys.len(), space.len());
    }

    #[test]
    fn generation_is_deterministic_and_restartable() {
        let space = ConfigurationSpace::new(SearchAxes::default(), FamilySelection::All).unwrap();
        let first: Vec<ModelConfig> = space.iter().collect();
        let second: Vec<ModelConfig> = space.iter().collect();
        assert_eq!(first, second);

        let rebuilt = ConfigurationSpace::new(SearchAxes::default(), FamilySelection::All).unwrap();
        assert!(rebuilt.iter().eq(first.iter().copied()));
    }

    #[test]
    fn nested_order_follows_axes() {
        let mut axes = SearchAxes::abbreviated();
        axes.lookback_periods = vec![1, 2];
        axes.linear.alpha = vec![0.1, 0.3];
        let space = ConfigurationSpace::new(axes, FamilySelection::Only(ModelFamily::Linear)).unwrap();

        let order: Vec<(u32, f64)> = space
            .iter()
            .map(|c| match c {
                ModelConfig::Linear(l) => (l.lookback_periods, l.alpha.get()),
                other => panic!("unexpected family {other}"),
            })
            .collect();
        assert_eq!(order, vec![(1, 0.1), (1, 0.3), (2, 0.1), (2, 0.3)]);
    }

    #[test]
    fn families_follow_selection() {
        let space = ConfigurationSpace::new(
            SearchAxes::default(),
            FamilySelection::Only(ModelFamily::RandomForest),
        )
        .unwrap();
        assert_eq!(space.len(), 480);
        assert!(space.iter().all(|c| c.family() == ModelFamily::RandomForest));

        let all = ConfigurationSpace::new(SearchAxes::default(), FamilySelection::All).unwrap();
        let families: Vec<ModelFamily> = all.iter().map(|c| c.family()).collect();
        assert_eq!(families.first(), Some(&ModelFamily::Linear));
        assert_eq!(families.last(), Some(&ModelFamily::BoostedTrees));
    }

    #[test]
    fn selection_parses_short_tags() {
        assert_eq!("all".parse::<FamilySelection>().unwrap(), FamilySelection::All);
        assert_eq!(
            "gb".parse::<FamilySelection>().unwrap(),
            FamilySelection::Only(ModelFamily::BoostedTrees)
        );
        assert_eq!(FamilySelection::Only(ModelFamily::Linear).to_string(), "en");
        assert!("svm".parse::<FamilySelection>().is_err());
    }

    #[test]
    fn invalid_axes_are_rejected_up_front() {
        let mut axes = SearchAxes::default();
        axes.boosting.learning_rate.clear();
        assert!(ConfigurationSpace::new(axes.clone(), FamilySelection::All).is_err());
        assert!(ConfigurationSpace::new(axes, FamilySelection::Only(ModelFamily::Linear)).is_ok());
    }
}
