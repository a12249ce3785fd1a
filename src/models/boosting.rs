//! Histogram gradient boosted trees on the binary log-loss.
//!
//! Features are quantised once into at most `max_bins` bins. Each round fits
//! a depth-limited regression tree to the gradient and hessian of the
//! weighted log-loss, with positives weighted by `scale_pos_weight`. Split
//! candidates are bin boundaries, stored as raw thresholds so prediction
//! never needs the bin mapper.

use linfa::traits::Fit;
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use tracing::debug;

use super::{check_training_labels, sigmoid, worker_pool, ClassWeight, Classifier, LabeledDataset, ModelError};

/// Gains at or below this are treated as no split.
const MIN_GAIN: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostingParams {
    n_rounds: usize,
    max_depth: usize,
    learning_rate: f64,
    scale_pos_weight: f64,
    max_bins: usize,
    /// L2 penalty on leaf values
    lambda: f64,
    /// Minimum gain to split
    gamma: f64,
    min_child_weight: f64,
    workers: usize,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 300,
            max_depth: 7,
            learning_rate: 0.1,
            scale_pos_weight: 10.0,
            max_bins: 256,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            workers: 0,
        }
    }
}

impl GradientBoostingParams {
    pub fn n_rounds(mut self, n_rounds: usize) -> Self {
        self.n_rounds = n_rounds;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn scale_pos_weight(mut self, scale_pos_weight: f64) -> Self {
        self.scale_pos_weight = scale_pos_weight;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if row[feature] <= threshold { left } else { right },
            }
        }
    }
}

#[derive(Debug)]
pub struct GradientBoosting {
    base_margin: f64,
    trees: Vec<RegressionTree>,
    pool: rayon::ThreadPool,
}

impl GradientBoosting {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw log-odds before the sigmoid.
    pub fn predict_margin(&self, records: &Array2<f64>) -> Array1<f64> {
        let margins: Vec<f64> = self.pool.install(|| {
            (0..records.nrows())
                .into_par_iter()
                .map(|i| {
                    let row = records.row(i);
                    self.base_margin + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
                })
                .collect()
        });
        Array1::from(margins)
    }
}

impl Classifier for GradientBoosting {
    fn predict_proba(&self, records: &Array2<f64>) -> Array1<f64> {
        self.predict_margin(records).mapv(sigmoid)
    }
}

/// Per-feature quantisation of the training matrix.
struct BinnedMatrix {
    /// Ascending upper bin edges per feature; bin `b` holds `(cuts[b-1], cuts[b]]`
    cuts: Vec<Vec<f64>>,
    /// Column-major bin index per sample
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn new(x: &Array2<f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, usize::from(u16::MAX) + 1);
        let (cuts, bins): (Vec<Vec<f64>>, Vec<Vec<u16>>) = (0..x.ncols())
            .into_par_iter()
            .map(|f| {
                let column = x.column(f);
                let cuts = bin_edges(column.to_vec(), max_bins);
                let bins = column
                    .iter()
                    .map(|&v| cuts.partition_point(|&c| c < v).min(cuts.len() - 1) as u16)
                    .collect::<Vec<u16>>();
                (cuts, bins)
            })
            .unzip();
        BinnedMatrix { cuts, bins }
    }

    fn n_features(&self) -> usize {
        self.cuts.len()
    }
}

/// Upper edges of at most `max_bins` bins. Every distinct value gets its own
/// bin when there are few enough, otherwise edges sit on sample quantiles.
fn bin_edges(mut values: Vec<f64>, max_bins: usize) -> Vec<f64> {
    values.sort_unstable_by(f64::total_cmp);
    let mut distinct = values.clone();
    distinct.dedup();
    if distinct.len() <= max_bins {
        return distinct;
    }

    let n = values.len();
    let mut cuts: Vec<f64> = (1..=max_bins)
        .map(|k| values[(k * n).div_ceil(max_bins) - 1])
        .collect();
    cuts.dedup();
    cuts
}

struct Candidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeBuilder<'a> {
    params: &'a GradientBoostingParams,
    binned: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    margins: &'a mut [f64],
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let (g, h) = rows
            .iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]));
        let id = self.nodes.len();

        let split = if depth < self.params.max_depth && rows.len() >= 2 {
            self.best_split(rows, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            let value = -g / (h + self.params.lambda) * self.params.learning_rate;
            for &i in rows.iter() {
                self.margins[i] += value;
            }
            self.nodes.push(Node::Leaf { value });
            return id;
        };

        self.nodes.push(Node::Leaf { value: 0.0 });
        let bins = &self.binned.bins[split.feature];
        let mut boundary = 0;
        for k in 0..rows.len() {
            if usize::from(bins[rows[k]]) <= split.bin {
                rows.swap(boundary, k);
                boundary += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(boundary);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: self.binned.cuts[split.feature][split.bin],
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<Candidate> {
        let lambda = self.params.lambda;
        let min_child = self.params.min_child_weight;
        let parent = g * g / (h + lambda);

        let candidates: Vec<Option<Candidate>> = (0..self.binned.n_features())
            .into_par_iter()
            .map(|feature| {
                let n_bins = self.binned.cuts[feature].len();
                if n_bins < 2 {
                    return None;
                }
                let bins = &self.binned.bins[feature];
                let mut histogram = vec![(0.0f64, 0.0f64); n_bins];
                for &i in rows {
                    let slot = &mut histogram[usize::from(bins[i])];
                    slot.0 += self.grad[i];
                    slot.1 += self.hess[i];
                }

                let mut best: Option<Candidate> = None;
                let (mut gl, mut hl) = (0.0, 0.0);
                for (bin, &(bg, bh)) in histogram.iter().enumerate().take(n_bins - 1) {
                    gl += bg;
                    hl += bh;
                    let (gr, hr) = (g - gl, h - hl);
                    if hl < min_child || hr < min_child {
                        continue;
                    }
                    let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent)
                        - self.params.gamma;
                    if best.as_ref().map_or(true, |b| gain > b.gain) {
                        best = Some(Candidate { feature, bin, gain });
                    }
                }
                best
            })
            .collect();

        // ties go to the lowest feature index
        let mut best: Option<Candidate> = None;
        for candidate in candidates.into_iter().flatten() {
            if best.as_ref().map_or(true, |b| candidate.gain > b.gain) {
                best = Some(candidate);
            }
        }
        best.filter(|b| b.gain > MIN_GAIN)
    }
}

impl Fit<Array2<f64>, Array1<usize>, ModelError> for GradientBoostingParams {
    type Object = GradientBoosting;

    fn fit(&self, dataset: &LabeledDataset) -> Result<Self::Object, ModelError> {
        let x = dataset.records();
        let y = dataset.targets();
        check_training_labels(y)?;

        let weights = ClassWeight::Positive(self.scale_pos_weight).sample_weights(y)?;
        let labels: Vec<f64> = y.iter().map(|&v| v as f64).collect();
        let n = x.nrows();
        let pool = worker_pool(self.workers)?;

        let total_weight = weights.sum();
        let positive_weight: f64 = weights.iter().zip(&labels).map(|(w, y)| w * y).sum();
        let base_rate = positive_weight / total_weight;
        let base_margin = (base_rate / (1.0 - base_rate)).ln();

        let binned = pool.install(|| BinnedMatrix::new(x, self.max_bins));
        debug!(
            rounds = self.n_rounds,
            threads = pool.current_num_threads(),
            base_margin,
            "Boosting trees"
        );

        let mut margins = vec![base_margin; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut rows: Vec<usize> = Vec::with_capacity(n);
        let mut trees = Vec::with_capacity(self.n_rounds);

        for round in 0..self.n_rounds {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = weights[i] * (p - labels[i]);
                hess[i] = weights[i] * p * (1.0 - p);
            }

            rows.clear();
            rows.extend(0..n);
            let mut builder = TreeBuilder {
                params: self,
                binned: &binned,
                grad: &grad,
                hess: &hess,
                margins: &mut margins,
                nodes: Vec::new(),
            };
            pool.install(|| builder.grow(&mut rows, 0));
            let nodes = builder.nodes;
            trees.push(RegressionTree { nodes });

            if (round + 1) % 50 == 0 {
                let loss = weighted_log_loss(&margins, &labels, &weights);
                debug!(round = round + 1, loss, "Boosting progress");
            }
        }

        Ok(GradientBoosting {
            base_margin,
            trees,
            pool,
        })
    }
}

fn weighted_log_loss(margins: &[f64], labels: &[f64], weights: &Array1<f64>) -> f64 {
    let total: f64 = margins
        .iter()
        .zip(labels)
        .zip(weights)
        .map(|((&z, &y), &w)| w * (z.max(0.0) + (-z.abs()).exp().ln_1p() - y * z))
        .sum();
    total / weights.sum()
}
