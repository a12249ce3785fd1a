//! Bagged ensemble of class-weighted CART trees.

use linfa::traits::Fit;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use super::tree::{DecisionTree, TreeParams};
use super::{check_training_labels, worker_pool, ClassWeight, Classifier, LabeledDataset, ModelError};

#[derive(Debug, Clone, PartialEq)]
pub struct RandomForestParams {
    n_trees: usize,
    max_depth: usize,
    /// Features tried per split, `None` for the square root of the feature count
    max_features: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    class_weight: ClassWeight,
    seed: u64,
    /// Worker threads, 0 for one per core
    workers: usize,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: 18,
            max_features: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            class_weight: ClassWeight::Balanced,
            seed: 42,
            workers: 0,
        }
    }
}

impl RandomForestParams {
    pub fn n_trees(mut self, n_trees: usize) -> Self {
        self.n_trees = n_trees;
        self
    }

    pub fn max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    fn tree_params(&self, n_features: usize) -> TreeParams {
        let sqrt = ((n_features as f64).sqrt() as usize).max(1);
        TreeParams {
            max_depth: self.max_depth,
            max_features: self.max_features.unwrap_or(sqrt).clamp(1, n_features.max(1)),
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
        }
    }
}

#[derive(Debug)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pool: rayon::ThreadPool,
}

impl RandomForest {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    /// Mean of the per-tree leaf probabilities.
    fn predict_proba(&self, records: &Array2<f64>) -> Array1<f64> {
        let n_trees = self.trees.len().max(1) as f64;
        let scores: Vec<f64> = self.pool.install(|| {
            (0..records.nrows())
                .into_par_iter()
                .map(|i| {
                    let row = records.row(i);
                    self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees
                })
                .collect()
        });
        Array1::from(scores)
    }
}

impl Fit<Array2<f64>, Array1<usize>, ModelError> for RandomForestParams {
    type Object = RandomForest;

    fn fit(&self, dataset: &LabeledDataset) -> Result<Self::Object, ModelError> {
        let x = dataset.records();
        let y = dataset.targets();
        let counts = check_training_labels(y)?;
        let class_weights = self.class_weight.per_class(counts);
        let labels = y.to_vec();
        let n = x.nrows();
        let tree_params = self.tree_params(x.ncols());
        let pool = worker_pool(self.workers)?;

        debug!(
            trees = self.n_trees,
            threads = pool.current_num_threads(),
            max_features = tree_params.max_features,
            "Growing random forest"
        );

        let trees: Vec<DecisionTree> = pool.install(|| {
            (0..self.n_trees)
                .into_par_iter()
                .map(|t| {
                    let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(t as u64));

                    let mut draws = vec![0u32; n];
                    for _ in 0..n {
                        draws[rng.gen_range(0..n)] += 1;
                    }
                    let weights: Vec<f64> = draws
                        .iter()
                        .zip(&labels)
                        .map(|(&d, &label)| f64::from(d) * class_weights[label])
                        .collect();
                    let mut samples: Vec<usize> = (0..n).filter(|&i| draws[i] > 0).collect();

                    DecisionTree::fit(x, &labels, &weights, &mut samples, &tree_params, &mut rng)
                })
                .collect()
        });

        let nodes: usize = trees.iter().map(DecisionTree::n_nodes).sum();
        let depth = trees.iter().map(DecisionTree::depth).max().unwrap_or(0);
        debug!(nodes, depth, "Random forest grown");

        Ok(RandomForest { trees, pool })
    }
}
