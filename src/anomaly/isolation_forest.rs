//! A from-scratch isolation forest.
//!
//! No crate in the surrounding stack (or anywhere in the reference corpus)
//! provides isolation-forest training — `linfa`/`smartcore` are absent —
//! so this substitutes the teacher's own `rand`/`rand_chacha` dependencies
//! for deterministic bootstrap sampling, feature selection, and split
//! points. Anomaly score mirrors scikit-learn's `score_samples`: average
//! path length across trees, normalized by `c(n)`, mapped to
//! `-2^(-normalized)`, so shorter average paths (easier to isolate, more
//! anomalous) produce scores approaching -1 and long paths approach 0.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

const SUBSAMPLE_SIZE: usize = 256;

enum Node {
    Leaf { size: usize },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

struct Tree {
    root: Node,
    max_depth: usize,
}

impl Tree {
    fn build(data: &[Vec<f64>], max_depth: usize, rng: &mut ChaCha8Rng) -> Self {
        let indices: Vec<usize> = (0..data.len()).collect();
        Tree {
            root: Self::build_node(data, &indices, 0, max_depth, rng),
            max_depth,
        }
    }

    fn build_node(data: &[Vec<f64>], indices: &[usize], depth: usize, max_depth: usize, rng: &mut ChaCha8Rng) -> Node {
        if depth >= max_depth || indices.len() <= 1 {
            return Node::Leaf { size: indices.len() };
        }

        let n_features = data[indices[0]].len();
        let feature = rng.gen_range(0..n_features);

        let mut min_v = f64::INFINITY;
        let mut max_v = f64::NEG_INFINITY;
        for &i in indices {
            let v = data[i][feature];
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        if (max_v - min_v).abs() < f64::EPSILON {
            return Node::Leaf { size: indices.len() };
        }

        let threshold = rng.gen_range(min_v..max_v);
        let left_indices: Vec<usize> = indices.iter().cloned().filter(|&i| data[i][feature] < threshold).collect();
        let right_indices: Vec<usize> = indices.iter().cloned().filter(|&i| data[i][feature] >= threshold).collect();

        if left_indices.is_empty() || right_indices.is_empty() {
            return Node::Leaf { size: indices.len() };
        }

        Node::Split {
            feature,
            threshold,
            left: Box::new(Self::build_node(data, &left_indices, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(data, &right_indices, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        Self::node_path_length(&self.root, point, 0, self.max_depth)
    }

    fn node_path_length(node: &Node, point: &[f64], depth: usize, max_depth: usize) -> f64 {
        match node {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if depth >= max_depth {
                    return depth as f64;
                }
                if point[*feature] < *threshold {
                    Self::node_path_length(left, point, depth + 1, max_depth)
                } else {
                    Self::node_path_length(right, point, depth + 1, max_depth)
                }
            }
        }
    }
}

/// The `c(n)` normalization constant: expected path length of an unsuccessful
/// search in a binary search tree of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * (n - 1.0).ln() + 0.5772156649 - 2.0 * (n - 1.0) / n
}

pub struct IsolationForest {
    trees: Vec<Tree>,
    c_n: f64,
    score_cutoff: f64,
}

impl IsolationForest {
    /// Train on `data` (each row a fixed-width feature vector). `contamination`
    /// sets the fraction of the training set expected to score as anomalous;
    /// the cutoff is the corresponding quantile of training scores.
    pub fn train(data: &[Vec<f64>], n_estimators: usize, contamination: f64, mut rng: ChaCha8Rng) -> Self {
        let subsample_size = SUBSAMPLE_SIZE.min(data.len()).max(1);
        let max_depth = (subsample_size as f64).log2().ceil() as usize;

        let mut trees = Vec::with_capacity(n_estimators);
        let mut indices: Vec<usize> = (0..data.len()).collect();
        for _ in 0..n_estimators {
            indices.shuffle(&mut rng);
            let sample: Vec<Vec<f64>> = indices[..subsample_size].iter().map(|&i| data[i].clone()).collect();
            trees.push(Tree::build(&sample, max_depth, &mut rng));
        }

        let c_n = average_path_length(subsample_size);
        let mut forest = IsolationForest {
            trees,
            c_n,
            score_cutoff: -0.9,
        };

        let mut scores: Vec<f64> = data.iter().map(|row| forest.score(row)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let cutoff_idx = ((contamination * scores.len() as f64).round() as usize).min(scores.len().saturating_sub(1));
        forest.score_cutoff = scores.get(cutoff_idx).copied().unwrap_or(-0.5);

        forest
    }

    /// Anomaly score, range `(-1, 0)`: lower (more negative) means more
    /// anomalous, matching scikit-learn's `score_samples` convention (the
    /// source scores against `model.score_samples`, not `decision_function`,
    /// so severity bands like `score < -0.5` are calibrated against this
    /// range, not the `decision_function`-shifted one).
    pub fn score(&self, point: &[f64]) -> f64 {
        let avg_path = self.trees.iter().map(|t| t.path_length(point)).sum::<f64>() / self.trees.len() as f64;
        let normalized = avg_path / self.c_n;
        -(2f64.powf(-normalized))
    }

    /// `true` when `point`'s score falls at or below the trained contamination cutoff.
    pub fn is_anomaly(&self, point: &[f64]) -> bool {
        self.score(point) <= self.score_cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn seeded_forest(data: &[Vec<f64>]) -> IsolationForest {
        IsolationForest::train(data, 50, 0.1, ChaCha8Rng::seed_from_u64(42))
    }

    #[test]
    fn isolates_an_obvious_outlier() {
        let mut data: Vec<Vec<f64>> = (0..200).map(|_| vec![0.0, 0.0, 0.0]).collect();
        data.push(vec![10.0, 10.0, 10.0]);
        let forest = seeded_forest(&data);
        let outlier_score = forest.score(&[10.0, 10.0, 10.0]);
        let normal_score = forest.score(&[0.0, 0.0, 0.0]);
        assert!(outlier_score < normal_score);
    }

    #[test]
    fn deterministic_given_same_seed() {
        let data: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64, (i * 2) as f64]).collect();
        let forest_a = IsolationForest::train(&data, 20, 0.1, ChaCha8Rng::seed_from_u64(7));
        let forest_b = IsolationForest::train(&data, 20, 0.1, ChaCha8Rng::seed_from_u64(7));
        let point = vec![25.0, 50.0];
        assert!((forest_a.score(&point) - forest_b.score(&point)).abs() < 1e-9);
    }
}
