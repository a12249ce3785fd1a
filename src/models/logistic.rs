//! L2-regularised logistic regression fitted with Newton iterations.

use linfa::traits::Fit;
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use tracing::{debug, warn};

use super::{check_training_labels, sigmoid, ClassWeight, Classifier, LabeledDataset, ModelError};

/// Diagonal jitter keeping the Hessian positive definite on separable data.
const RIDGE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegressionParams {
    max_iterations: usize,
    tolerance: f64,
    /// Inverse regularisation strength
    c: f64,
    class_weight: ClassWeight,
}

impl Default for LogisticRegressionParams {
    fn default() -> Self {
        Self {
            max_iterations: 4000,
            tolerance: 1e-6,
            c: 1.0,
            class_weight: ClassWeight::Balanced,
        }
    }
}

impl LogisticRegressionParams {
    pub fn class_weight(mut self, class_weight: ClassWeight) -> Self {
        self.class_weight = class_weight;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    coefficients: Array1<f64>,
    intercept: f64,
    converged: bool,
}

impl LogisticRegression {
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

impl Classifier for LogisticRegression {
    fn predict_proba(&self, records: &Array2<f64>) -> Array1<f64> {
        (records.dot(&self.coefficients) + self.intercept).mapv(sigmoid)
    }
}

impl Fit<Array2<f64>, Array1<usize>, ModelError> for LogisticRegressionParams {
    type Object = LogisticRegression;

    fn fit(&self, dataset: &LabeledDataset) -> Result<Self::Object, ModelError> {
        let x = dataset.records();
        let y = dataset.targets();
        check_training_labels(y)?;

        let weights = self.class_weight.sample_weights(y)?;
        let yf = y.mapv(|v| v as f64);
        let n_features = x.ncols();
        let penalty = 1.0 / self.c;

        // theta = [coefficients..., intercept]
        let mut theta = Array1::<f64>::zeros(n_features + 1);
        let mut loss = objective(x, &yf, &weights, theta.view(), penalty);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            iterations += 1;

            let z = margins(x, theta.view());
            let p = z.mapv(sigmoid);
            let residual = &weights * &(&p - &yf);
            let curvature = &weights * &p.mapv(|p| p * (1.0 - p));

            let mut gradient = Array1::<f64>::zeros(n_features + 1);
            gradient
                .slice_mut(s![..n_features])
                .assign(&(x.t().dot(&residual) + &theta.slice(s![..n_features]) * penalty));
            gradient[n_features] = residual.sum();

            let hessian = hessian(x, &curvature, penalty);
            let step = solve(hessian, gradient)?;

            // halve the Newton step until the objective stops increasing
            let mut scale = 1.0;
            let mut accepted = None;
            while scale > 1e-10 {
                let candidate = &theta - &(&step * scale);
                let candidate_loss = objective(x, &yf, &weights, candidate.view(), penalty);
                if candidate_loss <= loss {
                    accepted = Some((candidate, candidate_loss));
                    break;
                }
                scale *= 0.5;
            }

            let Some((candidate, candidate_loss)) = accepted else {
                converged = true;
                break;
            };

            let change = (&candidate - &theta)
                .iter()
                .fold(0.0_f64, |acc, v| acc.max(v.abs()));
            theta = candidate;
            loss = candidate_loss;
            if change < self.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            debug!(iterations, loss, "Logistic regression converged");
        } else {
            warn!(
                iterations,
                loss, "Logistic regression hit the iteration cap before converging"
            );
        }

        Ok(LogisticRegression {
            coefficients: theta.slice(s![..n_features]).to_owned(),
            intercept: theta[n_features],
            converged,
        })
    }
}

fn margins(x: &Array2<f64>, theta: ArrayView1<f64>) -> Array1<f64> {
    let n_features = x.ncols();
    x.dot(&theta.slice(s![..n_features])) + theta[n_features]
}

/// Weighted log-loss plus the L2 penalty on the coefficients.
fn objective(
    x: &Array2<f64>,
    y: &Array1<f64>,
    weights: &Array1<f64>,
    theta: ArrayView1<f64>,
    penalty: f64,
) -> f64 {
    let n_features = x.ncols();
    let z = margins(x, theta);
    let data: f64 = z
        .iter()
        .zip(y.iter())
        .zip(weights.iter())
        .map(|((&z, &y), &w)| w * (softplus(z) - y * z))
        .sum();
    let coefficients = theta.slice(s![..n_features]);
    data + 0.5 * penalty * coefficients.dot(&coefficients)
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    z.max(0.0) + (-z.abs()).exp().ln_1p()
}

fn hessian(x: &Array2<f64>, curvature: &Array1<f64>, penalty: f64) -> Array2<f64> {
    let n_features = x.ncols();
    let weighted = x * &curvature.view().insert_axis(Axis(1));

    let mut h = Array2::<f64>::zeros((n_features + 1, n_features + 1));
    h.slice_mut(s![..n_features, ..n_features])
        .assign(&x.t().dot(&weighted));
    let cross = weighted.sum_axis(Axis(0));
    h.slice_mut(s![..n_features, n_features]).assign(&cross);
    h.slice_mut(s![n_features, ..n_features]).assign(&cross);
    h[[n_features, n_features]] = curvature.sum();

    for i in 0..n_features {
        h[[i, i]] += penalty;
    }
    for i in 0..=n_features {
        h[[i, i]] += RIDGE;
    }
    h
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .ok_or(ModelError::Singular)?;
        if a[[pivot, col]].abs() < f64::MIN_POSITIVE {
            return Err(ModelError::Singular);
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            b.swap(pivot, col);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}
