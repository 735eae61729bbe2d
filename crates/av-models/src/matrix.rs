use av_data::Sample;
use av_types::{AvResult, ModelError};

/// Training rows copied out of the samples, validated once.
#[derive(Debug, Clone)]
pub(crate) struct Design {
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub n_features: usize,
}

impl Design {
    pub fn from_samples(train: &[Sample]) -> AvResult<Self> {
        let first = train.first().ok_or_else(|| ModelError::Fitting {
            message: "no training rows".to_string(),
        })?;
        let n_features = first.features.len();

        let mut rows = Vec::with_capacity(train.len());
        let mut targets = Vec::with_capacity(train.len());
        for sample in train {
            if sample.features.len() != n_features {
                return Err(ModelError::DimensionMismatch {
                    expected: n_features,
                    actual: sample.features.len(),
                }
                .into());
            }
            if !sample.price.is_finite() || sample.features.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::Fitting {
                    message: format!("non-finite value in training row for {}", sample.period),
                }
                .into());
            }
            rows.push(sample.features.clone());
            targets.push(sample.price);
        }

        Ok(Self {
            rows,
            targets,
            n_features,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

/// Whether every test sample has the width the model was trained on.
pub(crate) fn shape_matches(test: &[Sample], n_features: usize) -> bool {
    test.iter().all(|s| s.features.len() == n_features)
}

/// `values` if all finite, else `None`.
pub(crate) fn finite(values: Vec<f64>) -> Option<Vec<f64>> {
    values.iter().all(|v| v.is_finite()).then_some(values)
}

/// Linear-interpolated `q`-quantile of `values`, `q` in [0, 1].
pub(crate) fn quantile(values: &mut [f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(values[lo] + (values[hi] - values[lo]) * frac)
}
