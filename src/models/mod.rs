//! Binary fraud classifiers.
//!
//! Every model is configured through a params struct and trained with
//! [`linfa::traits::Fit`] on a [`LabeledDataset`] whose targets are 0/1.
//! Fitted models expose positive-class probabilities through [`Classifier`].

pub mod boosting;
pub mod forest;
pub mod logistic;
mod tree;

use linfa::Dataset;
use ndarray::{Array1, Array2, Ix1};
use thiserror::Error;

pub use boosting::{GradientBoosting, GradientBoostingParams};
pub use forest::{RandomForest, RandomForestParams};
pub use logistic::{LogisticRegression, LogisticRegressionParams};

/// Feature matrix with one 0/1 label per row. linfa's `Dataset` defaults to
/// two-dimensional targets, so the target dimension is pinned here.
pub type LabeledDataset = Dataset<f64, usize, Ix1>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("training data is empty")]
    EmptyDataset,

    #[error("training labels contain a single class ({0})")]
    SingleClass(usize),

    #[error("class {class} has only {count} sample(s), stratified split needs at least 2")]
    SmallClass { class: usize, count: usize },

    #[error("labels must be 0 or 1, found {0}")]
    InvalidLabel(usize),

    #[error("linear system is singular")]
    Singular,

    #[error("metric undefined: {0}")]
    UndefinedMetric(String),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Linfa(#[from] linfa::Error),
}

/// A fitted binary classifier.
pub trait Classifier: Send + Sync {
    /// Probability of the positive (fraud) class for every row.
    fn predict_proba(&self, records: &Array2<f64>) -> Array1<f64>;

    /// Class 1 iff the positive probability exceeds one half.
    fn predict(&self, records: &Array2<f64>) -> Array1<usize> {
        self.predict_proba(records).mapv(|p| usize::from(p > 0.5))
    }
}

/// Per-class sample reweighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassWeight {
    Uniform,
    /// `n / (2 * n_class)`, so both classes carry the same total weight
    Balanced,
    /// Positive samples weigh this much, negatives weigh 1
    Positive(f64),
}

impl ClassWeight {
    /// Weight of class 0 and class 1 given the class counts.
    pub fn per_class(&self, counts: [usize; 2]) -> [f64; 2] {
        match *self {
            ClassWeight::Uniform => [1.0, 1.0],
            ClassWeight::Balanced => {
                let n = (counts[0] + counts[1]) as f64;
                [
                    n / (2.0 * counts[0].max(1) as f64),
                    n / (2.0 * counts[1].max(1) as f64),
                ]
            }
            ClassWeight::Positive(w) => [1.0, w],
        }
    }

    pub fn sample_weights(&self, labels: &Array1<usize>) -> Result<Array1<f64>, ModelError> {
        let weights = self.per_class(class_counts(labels)?);
        Ok(labels.mapv(|y| weights[y]))
    }
}

/// Number of negatives and positives.
pub fn class_counts(labels: &Array1<usize>) -> Result<[usize; 2], ModelError> {
    let mut counts = [0usize; 2];
    for &y in labels {
        match y {
            0 | 1 => counts[y] += 1,
            other => return Err(ModelError::InvalidLabel(other)),
        }
    }
    Ok(counts)
}

/// Class counts of a training target, rejecting empty and single-class data.
pub fn check_training_labels(labels: &Array1<usize>) -> Result<[usize; 2], ModelError> {
    let counts = class_counts(labels)?;
    match counts {
        [0, 0] => Err(ModelError::EmptyDataset),
        [_, 0] => Err(ModelError::SingleClass(0)),
        [0, _] => Err(ModelError::SingleClass(1)),
        counts => Ok(counts),
    }
}

/// Dedicated pool for ensemble training; 0 workers means one per core.
pub(crate) fn worker_pool(workers: usize) -> Result<rayon::ThreadPool, ModelError> {
    Ok(rayon::ThreadPoolBuilder::new().num_threads(workers).build()?)
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
