//! Train/test splitting and feature standardisation.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::models::{class_counts, ModelError};

/// Row indices of the two partitions, each ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Split keeping the class proportions of `labels` in both partitions.
///
/// The test partition holds `ceil(test_ratio * n)` rows, apportioned to the
/// classes by largest remainder (ties to the lower class). Rows are drawn
/// from each class after a seeded shuffle.
pub fn stratified_split(
    labels: &Array1<usize>,
    test_ratio: f64,
    seed: u64,
) -> Result<TrainTestSplit, ModelError> {
    let counts = class_counts(labels)?;
    for (class, &count) in counts.iter().enumerate() {
        if count < 2 {
            return Err(ModelError::SmallClass { class, count });
        }
    }

    let n = labels.len();
    let n_test = ((test_ratio * n as f64).ceil() as usize).clamp(1, n - 1);

    let exact: Vec<f64> = counts
        .iter()
        .map(|&c| n_test as f64 * c as f64 / n as f64)
        .collect();
    let mut allocation: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut remaining = n_test - allocation.iter().sum::<usize>();
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for class in order {
        if remaining == 0 {
            break;
        }
        if allocation[class] < counts[class] {
            allocation[class] += 1;
            remaining -= 1;
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (class, &take) in allocation.iter().enumerate() {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &y)| y == class)
            .map(|(i, _)| i)
            .collect();
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    Ok(TrainTestSplit { train, test })
}

/// Column-wise standardisation to zero mean and unit population variance.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(records: &Array2<f64>) -> Self {
        let n = records.nrows().max(1) as f64;
        let mean = records.sum_axis(Axis(0)) / n;
        // constant columns keep their offset but are not rescaled
        let scale = records
            .axis_iter(Axis(1))
            .zip(mean.iter())
            .map(|(column, &m)| {
                let variance = column.iter().map(|x| (x - m).powi(2)).sum::<f64>() / n;
                let std_dev = variance.sqrt();
                if std_dev > 0.0 {
                    std_dev
                } else {
                    1.0
                }
            })
            .collect::<Array1<f64>>();
        StandardScaler { mean, scale }
    }

    pub fn transform(&self, records: &Array2<f64>) -> Array2<f64> {
        (records - &self.mean) / &self.scale
    }
}
