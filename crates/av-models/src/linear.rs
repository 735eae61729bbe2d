//! Elastic net regression fitted by cyclic coordinate descent.
//!
//! Minimizes
//! `1/(2n) * ||y - Xw||^2 + alpha * l1_ratio * ||w||_1 + alpha * (1 - l1_ratio) / 2 * ||w||^2`
//! on standardized features, then maps the weights back to the input scale.
//! With `Units::Log` features are fitted as `ln(1 + x)` and the target as `ln(y)`.

use av_data::Sample;
use av_types::{AvResult, Importances, LinearConfig, ModelError, Units};

use crate::matrix::{finite, shape_matches, Design};
use crate::FittedModel;

const MAX_ITER: usize = 1000;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct ElasticNet {
    x_units: Units,
    y_units: Units,
    intercept: f64,
    coefficients: Vec<f64>,
}

impl ElasticNet {
    pub fn fit(config: &LinearConfig, train: &[Sample]) -> AvResult<Self> {
        let design = Design::from_samples(train)?;
        let n = design.len() as f64;
        let p = design.n_features;

        let rows = design
            .rows
            .iter()
            .map(|row| transform_x(row, config.x_units))
            .collect::<AvResult<Vec<_>>>()?;
        let y = design
            .targets
            .iter()
            .map(|&v| transform_y(v, config.y_units))
            .collect::<AvResult<Vec<_>>>()?;

        // column-major standardized design
        let mut means = vec![0.0; p];
        let mut scales = vec![0.0; p];
        let mut columns = vec![vec![0.0; rows.len()]; p];
        for j in 0..p {
            let mean = rows.iter().map(|r| r[j]).sum::<f64>() / n;
            let var = rows.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
            means[j] = mean;
            scales[j] = var.sqrt();
            if scales[j] > 0.0 {
                for (i, r) in rows.iter().enumerate() {
                    columns[j][i] = (r[j] - mean) / scales[j];
                }
            }
        }

        let y_mean = y.iter().sum::<f64>() / n;
        let mut residual: Vec<f64> = y.iter().map(|v| v - y_mean).collect();

        let alpha = config.alpha.get();
        let l1_ratio = config.l1_ratio.get();
        let l1 = alpha * l1_ratio;
        let l2 = alpha * (1.0 - l1_ratio);

        let mut weights = vec![0.0; p];
        let mut converged = false;
        for _ in 0..MAX_ITER {
            let mut max_step: f64 = 0.0;
            let mut max_weight: f64 = 0.0;
            for j in 0..p {
                if scales[j] == 0.0 {
                    continue;
                }
                let column = &columns[j];
                let old = weights[j];
                // standardized columns have unit mean square
                let rho = column
                    .iter()
                    .zip(&residual)
                    .map(|(x, r)| x * r)
                    .sum::<f64>()
                    / n
                    + old;
                let new = soft_threshold(rho, l1) / (1.0 + l2);
                if new != old {
                    let delta = new - old;
                    for (r, x) in residual.iter_mut().zip(column) {
                        *r -= delta * x;
                    }
                    weights[j] = new;
                }
                max_step = max_step.max((new - old).abs());
                max_weight = max_weight.max(new.abs());
            }
            if max_weight == 0.0 || max_step / max_weight < TOLERANCE {
                converged = true;
                break;
            }
        }
        if !converged {
            tracing::debug!(
                "Elastic net did not converge in {} iterations (alpha={}, l1_ratio={})",
                MAX_ITER,
                alpha,
                l1_ratio
            );
        }

        let coefficients: Vec<f64> = weights
            .iter()
            .zip(&scales)
            .map(|(w, s)| if *s > 0.0 { w / s } else { 0.0 })
            .collect();
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&means)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        if !intercept.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::Fitting {
                message: "elastic net produced non-finite weights".to_string(),
            }
            .into());
        }

        Ok(Self {
            x_units: config.x_units,
            y_units: config.y_units,
            intercept,
            coefficients,
        })
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }
}

impl FittedModel for ElasticNet {
    fn predict(&self, test: &[Sample]) -> Option<Vec<f64>> {
        if !shape_matches(test, self.coefficients.len()) {
            return None;
        }
        let predictions = test
            .iter()
            .map(|sample| {
                let x = transform_x(&sample.features, self.x_units).ok()?;
                let z = self.intercept
                    + x.iter()
                        .zip(&self.coefficients)
                        .map(|(v, c)| v * c)
                        .sum::<f64>();
                Some(match self.y_units {
                    Units::Natural => z,
                    Units::Log => z.exp(),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        finite(predictions)
    }

    fn importances(&self) -> Option<Importances> {
        Some(Importances::Linear {
            intercept: self.intercept,
            coefficients: self.coefficients.clone(),
        })
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

fn transform_x(row: &[f64], units: Units) -> AvResult<Vec<f64>> {
    match units {
        Units::Natural => Ok(row.to_vec()),
        Units::Log => row
            .iter()
            .map(|&v| {
                if v > -1.0 {
                    Ok(v.ln_1p())
                } else {
                    Err(ModelError::Fitting {
                        message: format!("feature value {} has no log", v),
                    }
                    .into())
                }
            })
            .collect(),
    }
}

fn transform_y(value: f64, units: Units) -> AvResult<f64> {
    match units {
        Units::Natural => Ok(value),
        Units::Log if value > 0.0 => Ok(value.ln()),
        Units::Log => Err(ModelError::Fitting {
            message: format!("price {} has no log", value),
        }
        .into()),
    }
}
