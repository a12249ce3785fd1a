//! Weighted CART classification tree, the base learner of the random forest.

use ndarray::{Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    /// Non-constant features to evaluate per split
    pub max_features: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        proba: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct DecisionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct Grower<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    weights: &'a [f64],
    params: &'a TreeParams,
    nodes: Vec<Node>,
    buffer: Vec<(f64, usize)>,
}

impl DecisionTree {
    /// Grow a tree on the rows listed in `samples`. `weights` and `y` are
    /// indexed by row of `x`.
    pub fn fit(
        x: &Array2<f64>,
        y: &[usize],
        weights: &[f64],
        samples: &mut [usize],
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let mut grower = Grower {
            x,
            y,
            weights,
            params,
            nodes: Vec::new(),
            buffer: Vec::with_capacity(samples.len()),
        };
        grower.grow(samples, 0, rng);
        DecisionTree {
            nodes: grower.nodes,
        }
    }

    /// Positive-class share of the leaf `row` falls into.
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { proba } => return proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Grower<'_> {
    fn grow(&mut self, samples: &mut [usize], depth: usize, rng: &mut ChaCha8Rng) -> usize {
        let (w0, w1) = self.class_weights(samples);
        let id = self.nodes.len();
        let total = w0 + w1;
        let proba = if total > 0.0 { w1 / total } else { 0.0 };
        self.nodes.push(Node::Leaf { proba });

        if depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
            || w0 == 0.0
            || w1 == 0.0
        {
            return id;
        }

        let Some(split) = self.best_split(samples, rng) else {
            return id;
        };

        let mut boundary = 0;
        for k in 0..samples.len() {
            if self.x[[samples[k], split.feature]] <= split.threshold {
                samples.swap(boundary, k);
                boundary += 1;
            }
        }
        let (left_samples, right_samples) = samples.split_at_mut(boundary);
        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn class_weights(&self, samples: &[usize]) -> (f64, f64) {
        samples.iter().fold((0.0, 0.0), |(w0, w1), &i| {
            if self.y[i] == 1 {
                (w0, w1 + self.weights[i])
            } else {
                (w0 + self.weights[i], w1)
            }
        })
    }

    /// Lowest weighted Gini split over a random subset of features. The
    /// search keeps going past `max_features` until a valid split is found.
    fn best_split(&mut self, samples: &[usize], rng: &mut ChaCha8Rng) -> Option<Split> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);

        let (total0, total1) = self.class_weights(samples);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<Split> = None;
        let mut visited = 0;

        for feature in features {
            if visited >= self.params.max_features && best.is_some() {
                break;
            }

            self.buffer.clear();
            self.buffer
                .extend(samples.iter().map(|&i| (self.x[[i, feature]], i)));
            self.buffer.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

            let n = self.buffer.len();
            if self.buffer[0].0 == self.buffer[n - 1].0 {
                continue;
            }
            visited += 1;

            let (mut left0, mut left1) = (0.0, 0.0);
            for k in 0..n - 1 {
                let (value, i) = self.buffer[k];
                if self.y[i] == 1 {
                    left1 += self.weights[i];
                } else {
                    left0 += self.weights[i];
                }

                let next = self.buffer[k + 1].0;
                if value == next || k + 1 < min_leaf || n - k - 1 < min_leaf {
                    continue;
                }

                let (right0, right1) = (total0 - left0, total1 - left1);
                let score = purity(left0, left1) + purity(right0, right1);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    let mut threshold = value + (next - value) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        score,
                    });
                }
            }
        }
        best
    }
}

/// `sum(w_c^2) / w`; minimising weighted Gini maximises this summed over children.
fn purity(w0: f64, w1: f64) -> f64 {
    let total = w0 + w1;
    if total > 0.0 {
        (w0 * w0 + w1 * w1) / total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            max_features: 2,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }

    #[test]
    fn test_tree_separates_threshold() {
        let x = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0], [10.0, 7.0], [11.0, 7.0]];
        let y = [0, 0, 0, 1, 1];
        let weights = [1.0; 5];
        let mut samples: Vec<usize> = (0..5).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let tree = DecisionTree::fit(&x, &y, &weights, &mut samples, &params(4), &mut rng);

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.predict_row(array![2.5, 7.0].view()), 0.0);
        assert_eq!(tree.predict_row(array![6.5, 7.0].view()), 0.0);
        assert_eq!(tree.predict_row(array![6.6, 7.0].view()), 1.0);
        assert_eq!(tree.predict_row(array![3.0, 0.0].view()), 0.0);
    }

    #[test]
    fn test_depth_limit_produces_mixed_leaf() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [0, 1, 0, 1];
        let weights = [1.0, 1.0, 1.0, 3.0];
        let mut samples: Vec<usize> = (0..4).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let tree = DecisionTree::fit(&x, &y, &weights, &mut samples, &params(0), &mut rng);

        assert_eq!(tree.n_nodes(), 1);
        assert!((tree.predict_row(array![0.0].view()) - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_features_make_a_leaf() {
        let x = array![[5.0], [5.0], [5.0]];
        let y = [0, 1, 1];
        let weights = [1.0; 3];
        let mut samples: Vec<usize> = (0..3).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let tree = DecisionTree::fit(&x, &y, &weights, &mut samples, &params(8), &mut rng);

        assert_eq!(tree.n_nodes(), 1);
    }

    #[test]
    fn test_only_listed_samples_are_used() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = [0, 0, 1, 1];
        let weights = [1.0; 4];
        let mut samples = vec![0, 1];
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let tree = DecisionTree::fit(&x, &y, &weights, &mut samples, &params(8), &mut rng);

        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict_row(array![3.0].view()), 0.0);
    }
}
