//! Seeded random forest of Gini decision trees for binary labels.

use crate::forecast::features::{FEATURE_COUNT, FeatureRow};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub const DEFAULT_TREES: usize = 100;
pub const MIN_SAMPLES_SPLIT: usize = 2;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        positive: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grow a tree on `sample` (indices into `rows`, duplicates allowed) until
    /// every leaf is pure or cannot be split further.
    pub fn fit(
        rows: &[FeatureRow],
        labels: &[bool],
        sample: Vec<usize>,
        max_features: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut nodes = vec![Node::Leaf { positive: 0.0 }];
        let mut pending = vec![(0usize, sample)];

        while let Some((index, samples)) = pending.pop() {
            let positives = samples.iter().filter(|&&i| labels[i]).count();
            let positive = if samples.is_empty() {
                0.0
            } else {
                positives as f64 / samples.len() as f64
            };

            let pure = positives == 0 || positives == samples.len();
            if pure || samples.len() < MIN_SAMPLES_SPLIT {
                nodes[index] = Node::Leaf { positive };
                continue;
            }

            let Some(split) = best_split(rows, labels, &samples, max_features, rng) else {
                nodes[index] = Node::Leaf { positive };
                continue;
            };

            let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
                .into_iter()
                .partition(|&i| rows[i][split.feature] <= split.threshold);
            if left_samples.is_empty() || right_samples.is_empty() {
                nodes[index] = Node::Leaf { positive };
                continue;
            }

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { positive });
            nodes.push(Node::Leaf { positive });
            nodes[index] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            pending.push((left, left_samples));
            pending.push((right, right_samples));
        }

        Self { nodes }
    }

    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { positive } => return *positive,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Lowest weighted Gini impurity over a random subset of features. Falls
/// through to the remaining features when none of the subset can split.
fn best_split(
    rows: &[FeatureRow],
    labels: &[bool],
    samples: &[usize],
    max_features: usize,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let mut features: Vec<usize> = (0..FEATURE_COUNT).collect();
    features.shuffle(rng);

    let total = samples.len() as f64;
    let total_positive = samples.iter().filter(|&&i| labels[i]).count() as f64;
    let mut best: Option<BestSplit> = None;
    let mut values: Vec<(f64, bool)> = Vec::with_capacity(samples.len());

    for (visited, &feature) in features.iter().enumerate() {
        if visited >= max_features && best.is_some() {
            break;
        }

        values.clear();
        values.extend(samples.iter().map(|&i| (rows[i][feature], labels[i])));
        values.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_count = 0.0;
        let mut left_positive = 0.0;
        for pair in values.windows(2) {
            let (value, label) = pair[0];
            left_count += 1.0;
            if label {
                left_positive += 1.0;
            }
            let next = pair[1].0;
            if value >= next {
                continue;
            }

            let right_count = total - left_count;
            let right_positive = total_positive - left_positive;
            let impurity = (left_count * gini(left_positive, left_count)
                + right_count * gini(right_positive, right_count))
                / total;

            if best.as_ref().is_none_or(|b| impurity < b.impurity) {
                best = Some(BestSplit {
                    feature,
                    threshold: value + (next - value) / 2.0,
                    impurity,
                });
            }
        }
    }

    best
}

fn gini(positive: f64, count: f64) -> f64 {
    if count == 0.0 {
        return 0.0;
    }
    let p = positive / count;
    2.0 * p * (1.0 - p)
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit `trees` bootstrapped trees on the rows selected by `train`.
    pub fn fit(
        rows: &[FeatureRow],
        labels: &[bool],
        train: &[usize],
        trees: usize,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let max_features = ((FEATURE_COUNT as f64).sqrt() as usize).max(1);

        let trees = (0..trees.max(1))
            .map(|_| {
                let bootstrap: Vec<usize> = if train.is_empty() {
                    Vec::new()
                } else {
                    (0..train.len())
                        .map(|_| train[rng.gen_range(0..train.len())])
                        .collect()
                };
                DecisionTree::fit(rows, labels, bootstrap, max_features, &mut rng)
            })
            .collect();

        Self { trees }
    }

    /// Mean positive-class probability across trees.
    pub fn predict_proba(&self, row: &FeatureRow) -> f64 {
        let sum: f64 = self.trees.iter().map(|tree| tree.predict_proba(row)).sum();
        sum / self.trees.len() as f64
    }

    pub fn predict(&self, row: &FeatureRow) -> bool {
        self.predict_proba(row) > 0.5
    }

    pub fn accuracy(&self, rows: &[FeatureRow], labels: &[bool], test: &[usize]) -> f64 {
        if test.is_empty() {
            return 0.0;
        }
        let correct = test
            .iter()
            .filter(|&&i| self.predict(&rows[i]) == labels[i])
            .count();
        correct as f64 / test.len() as f64
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

/// Shuffle `0..len` with `seed` and hold out `ceil(len * test_fraction)` indices.
///
/// Both sides keep at least one index when `len >= 2`.
pub fn train_test_split(len: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let fraction = if test_fraction.is_finite() {
        test_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut test_len = (len as f64 * fraction).ceil() as usize;
    if len >= 2 {
        test_len = test_len.clamp(1, len - 1);
    } else {
        test_len = 0;
    }

    let train = indices.split_off(test_len);
    (train, indices)
}
