//! Hyperparameter configurations for the three model families.
//!
//! [`ModelConfig`] is the checkpoint key. Equality and hashing cover every
//! field of the variant plus the variant itself, so numerically identical
//! field sets from different families never collide.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::errors::{AvError, SweepError};

/// A hyperparameter value that participates in key equality.
///
/// Compared bitwise after folding `-0.0` into `0.0`; axes are validated to be
/// finite before any configuration is built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scalar(f64);

impl Scalar {
    pub fn new(value: f64) -> Self {
        Self(if value == 0.0 { 0.0 } else { value })
    }

    pub fn get(self) -> f64 {
        self.0
    }

    fn key_bits(self) -> u64 {
        if self.0 == 0.0 {
            0
        } else {
            self.0.to_bits()
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.key_bits() == other.key_bits()
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key_bits().hash(state);
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Model family discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    RandomForest,
    BoostedTrees,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::Linear,
        ModelFamily::RandomForest,
        ModelFamily::BoostedTrees,
    ];

    /// Tag written into checkpoint records.
    pub fn record_tag(&self) -> &'static str {
        match self {
            ModelFamily::Linear => "linear",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::BoostedTrees => "boosted_trees",
        }
    }

    /// Short tag used on the command line and in file names.
    pub fn short_tag(&self) -> &'static str {
        match self {
            ModelFamily::Linear => "en",
            ModelFamily::RandomForest => "rf",
            ModelFamily::BoostedTrees => "gb",
        }
    }

    pub fn from_record_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.record_tag() == tag)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelFamily::Linear => "ElasticNet",
            ModelFamily::RandomForest => "RandomForestRegressor",
            ModelFamily::BoostedTrees => "GradientBoostingRegressor",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ModelFamily {
    type Err = AvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| {
                f.short_tag() == lowered
                    || f.record_tag() == lowered
                    || f.to_string().to_lowercase() == lowered
            })
            .ok_or_else(|| {
                SweepError::UnknownFamily {
                    name: s.to_string(),
                }
                .into()
            })
    }
}

/// Scale on which features or the target are fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    Natural,
    Log,
}

impl Units {
    pub fn short(&self) -> &'static str {
        match self {
            Units::Natural => "nat",
            Units::Log => "log",
        }
    }
}

/// Number of features considered at each tree split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MaxFeaturesRepr", into = "MaxFeaturesRepr")]
pub enum MaxFeatures {
    /// Every feature (`"auto"`).
    All,
    Sqrt,
    Log2,
    Count(u32),
    Fraction(Scalar),
}

impl MaxFeatures {
    /// Concrete feature count for a dataset with `n_features` columns; always in `1..=n_features`
    /// when `n_features > 0`.
    pub fn resolve(&self, n_features: usize) -> usize {
        if n_features == 0 {
            return 0;
        }
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::Count(k) => *k as usize,
            MaxFeatures::Fraction(f) => (f.get() * n).floor() as usize,
        };
        k.clamp(1, n_features)
    }
}

impl fmt::Display for MaxFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxFeatures::All => write!(f, "auto"),
            MaxFeatures::Sqrt => write!(f, "sqrt"),
            MaxFeatures::Log2 => write!(f, "log2"),
            MaxFeatures::Count(k) => write!(f, "{k}"),
            MaxFeatures::Fraction(v) => write!(f, "{v:.2}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MaxFeaturesRepr {
    Name(String),
    Count(u32),
    Fraction(f64),
}

impl TryFrom<MaxFeaturesRepr> for MaxFeatures {
    type Error = String;

    fn try_from(repr: MaxFeaturesRepr) -> Result<Self, Self::Error> {
        match repr {
            MaxFeaturesRepr::Name(name) => match name.as_str() {
                "auto" | "all" => Ok(MaxFeatures::All),
                "sqrt" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                other => Err(format!("unknown max_features rule {other:?}")),
            },
            MaxFeaturesRepr::Count(0) => Err("max_features count must be at least 1".to_string()),
            MaxFeaturesRepr::Count(k) => Ok(MaxFeatures::Count(k)),
            MaxFeaturesRepr::Fraction(v) if v > 0.0 && v <= 1.0 => {
                Ok(MaxFeatures::Fraction(Scalar::new(v)))
            }
            MaxFeaturesRepr::Fraction(v) => Err(format!("max_features fraction {v} not in (0, 1]")),
        }
    }
}

impl From<MaxFeatures> for MaxFeaturesRepr {
    fn from(value: MaxFeatures) -> Self {
        match value {
            MaxFeatures::All => MaxFeaturesRepr::Name("auto".into()),
            MaxFeatures::Sqrt => MaxFeaturesRepr::Name("sqrt".into()),
            MaxFeatures::Log2 => MaxFeaturesRepr::Name("log2".into()),
            MaxFeatures::Count(k) => MaxFeaturesRepr::Count(k),
            MaxFeatures::Fraction(v) => MaxFeaturesRepr::Fraction(v.get()),
        }
    }
}

/// Boosting loss function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Loss {
    #[serde(rename = "ls")]
    LeastSquares,
    #[serde(rename = "lad")]
    LeastAbsoluteDeviation,
    #[serde(rename = "huber")]
    Huber,
    #[serde(rename = "quantile")]
    Quantile,
}

impl Loss {
    /// Quantile used by the robust losses (huber transition, quantile target).
    pub fn alpha(&self) -> Option<f64> {
        match self {
            Loss::Huber => Some(0.9),
            Loss::Quantile => Some(0.5),
            Loss::LeastSquares | Loss::LeastAbsoluteDeviation => None,
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Loss::LeastSquares => "ls",
            Loss::LeastAbsoluteDeviation => "lad",
            Loss::Huber => "huber",
            Loss::Quantile => "quantile",
        };
        write!(f, "{}", s)
    }
}

/// Elastic net hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinearConfig {
    pub lookback_periods: u32,
    pub x_units: Units,
    pub y_units: Units,
    /// Multiplies the penalty term.
    pub alpha: Scalar,
    /// 0 is a pure L2 penalty, 1 a pure L1 penalty.
    pub l1_ratio: Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomForestConfig {
    pub lookback_periods: u32,
    pub n_estimators: u32,
    pub max_features: MaxFeatures,
    /// `None` grows trees until leaves are pure.
    pub max_depth: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoostedTreesConfig {
    pub lookback_periods: u32,
    /// Number of boosting stages.
    pub n_estimators: u32,
    pub max_features: MaxFeatures,
    pub max_depth: Option<u32>,
    pub loss: Loss,
    pub learning_rate: Scalar,
}

/// One point in hyperparameter space, tagged by model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum ModelConfig {
    Linear(LinearConfig),
    RandomForest(RandomForestConfig),
    BoostedTrees(BoostedTreesConfig),
}

impl ModelConfig {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelConfig::Linear(_) => ModelFamily::Linear,
            ModelConfig::RandomForest(_) => ModelFamily::RandomForest,
            ModelConfig::BoostedTrees(_) => ModelFamily::BoostedTrees,
        }
    }

    pub fn lookback_periods(&self) -> u32 {
        match self {
            ModelConfig::Linear(c) => c.lookback_periods,
            ModelConfig::RandomForest(c) => c.lookback_periods,
            ModelConfig::BoostedTrees(c) => c.lookback_periods,
        }
    }
}

impl From<LinearConfig> for ModelConfig {
    fn from(config: LinearConfig) -> Self {
        ModelConfig::Linear(config)
    }
}

impl From<RandomForestConfig> for ModelConfig {
    fn from(config: RandomForestConfig) -> Self {
        ModelConfig::RandomForest(config)
    }
}

impl From<BoostedTreesConfig> for ModelConfig {
    fn from(config: BoostedTreesConfig) -> Self {
        ModelConfig::BoostedTrees(config)
    }
}

fn depth_label(depth: Option<u32>) -> String {
    depth.map_or_else(|| "none".to_string(), |d| d.to_string())
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelConfig::Linear(c) => write!(
                f,
                "en lookback={} x={} y={} alpha={} l1_ratio={}",
                c.lookback_periods,
                c.x_units.short(),
                c.y_units.short(),
                c.alpha,
                c.l1_ratio
            ),
            ModelConfig::RandomForest(c) => write!(
                f,
                "rf lookback={} n_estimators={} max_features={} max_depth={}",
                c.lookback_periods,
                c.n_estimators,
                c.max_features,
                depth_label(c.max_depth)
            ),
            ModelConfig::BoostedTrees(c) => write!(
                f,
                "gb lookback={} n_estimators={} max_features={} max_depth={} loss={} learning_rate={}",
                c.lookback_periods,
                c.n_estimators,
                c.max_features,
                depth_label(c.max_depth),
                c.loss,
                c.learning_rate
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn linear(alpha: f64, l1_ratio: f64) -> ModelConfig {
        LinearConfig {
            lookback_periods: 3,
            x_units: Units::Log,
            y_units: Units::Natural,
            alpha: alpha.into(),
            l1_ratio: l1_ratio.into(),
        }
        .into()
    }

    #[test]
    fn family_tag_separates_keys() {
        let en = linear(0.1, 0.0);
        let rf: ModelConfig = RandomForestConfig {
            lookback_periods: 3,
            n_estimators: 1,
            max_features: MaxFeatures::Count(1),
            max_depth: Some(1),
        }
        .into();
        let gb: ModelConfig = BoostedTreesConfig {
            lookback_periods: 3,
            n_estimators: 1,
            max_features: MaxFeatures::Count(1),
            max_depth: Some(1),
            loss: Loss::LeastSquares,
            learning_rate: 0.1.into(),
        }
        .into();

        let set: HashSet<ModelConfig> = [en, rf, gb].into_iter().collect();
        assert_eq!(set.len(), 3);
        assert_ne!(en, rf);
    }

    #[test]
    fn equal_fields_make_equal_keys() {
        let mut set = HashSet::new();
        set.insert(linear(0.1, 0.0));
        set.insert(linear(0.1, -0.0));
        set.insert(linear(0.1, 0.0));
        assert_eq!(set.len(), 1);
        assert!(set.contains(&linear(0.1, 0.0)));
        assert!(!set.contains(&linear(0.3, 0.0)));
    }

    #[test]
    fn record_json_carries_family_tag() {
        let json = serde_json::to_value(linear(0.1, 0.25)).unwrap();
        assert_eq!(json["family"], "linear");
        assert_eq!(json["x_units"], "log");
        assert!(json.get("n_estimators").is_none());

        let back: ModelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, linear(0.1, 0.25));
    }

    #[test]
    fn max_features_accepts_names_counts_and_fractions() {
        let parsed: Vec<MaxFeatures> =
            serde_json::from_str(r#"["auto", "sqrt", "log2", 1, 0.3]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                MaxFeatures::All,
                MaxFeatures::Sqrt,
                MaxFeatures::Log2,
                MaxFeatures::Count(1),
                MaxFeatures::Fraction(0.3.into()),
            ]
        );
        assert!(serde_json::from_str::<MaxFeatures>(r#""half""#).is_err());
        assert!(serde_json::from_str::<MaxFeatures>("0").is_err());
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::All.resolve(16), 16);
        assert_eq!(MaxFeatures::Sqrt.resolve(16), 4);
        assert_eq!(MaxFeatures::Log2.resolve(16), 4);
        assert_eq!(MaxFeatures::Count(40).resolve(16), 16);
        assert_eq!(MaxFeatures::Fraction(0.1.into()).resolve(5), 1);
        assert_eq!(MaxFeatures::Sqrt.resolve(0), 0);
    }

    #[test]
    fn family_parsing() {
        assert_eq!("en".parse::<ModelFamily>().unwrap(), ModelFamily::Linear);
        assert_eq!("random_forest".parse::<ModelFamily>().unwrap(), ModelFamily::RandomForest);
        assert_eq!(
            "GradientBoostingRegressor".parse::<ModelFamily>().unwrap(),
            ModelFamily::BoostedTrees
        );
        assert!("svm".parse::<ModelFamily>().is_err());
        assert_eq!(ModelFamily::from_record_tag("boosted_trees"), Some(ModelFamily::BoostedTrees));
        assert_eq!(ModelFamily::from_record_tag("svm"), None);
    }

    #[test]
    fn loss_alpha_only_for_robust_losses() {
        assert_eq!(Loss::LeastSquares.alpha(), None);
        assert_eq!(Loss::Huber.alpha(), Some(0.9));
        assert_eq!(Loss::Quantile.alpha(), Some(0.5));
    }
}
