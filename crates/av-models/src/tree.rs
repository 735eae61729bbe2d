//! CART regression tree on squared error, shared by the forest and boosting models.

use rand::seq::index;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
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

#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<u32>,
    /// Features considered at each split.
    pub max_features: usize,
    pub min_samples_split: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RegressionTree {
    nodes: Vec<Node>,
    /// Total impurity decrease per feature, unnormalized.
    impurity_decrease: Vec<f64>,
}

struct Pending {
    node: usize,
    rows: Vec<usize>,
    depth: u32,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree over `rows` (indices into `x`/`y`, repeats allowed).
    pub fn fit<R: Rng + ?Sized>(
        x: &[Vec<f64>],
        y: &[f64],
        rows: Vec<usize>,
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut tree = Self {
            nodes: vec![Node::Leaf { value: 0.0 }],
            impurity_decrease: vec![0.0; n_features],
        };

        let mut stack = vec![Pending {
            node: 0,
            rows,
            depth: 0,
        }];
        while let Some(Pending { node, rows, depth }) = stack.pop() {
            let value = mean(rows.iter().map(|&i| y[i]));
            tree.nodes[node] = Node::Leaf { value };

            let depth_left = params.max_depth.map_or(true, |max| depth < max);
            if !depth_left || rows.len() < params.min_samples_split.max(2) {
                continue;
            }
            let Some(best) = best_split(x, y, &rows, n_features, params.max_features, rng) else {
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .partition(|&&i| x[i][best.feature] <= best.threshold);
            if left_rows.is_empty() || right_rows.is_empty() {
                continue;
            }

            let left = tree.nodes.len();
            let right = left + 1;
            tree.nodes.push(Node::Leaf { value: 0.0 });
            tree.nodes.push(Node::Leaf { value: 0.0 });
            tree.nodes[node] = Node::Split {
                feature: best.feature,
                threshold: best.threshold,
                left,
                right,
            };
            tree.impurity_decrease[best.feature] += best.gain;

            stack.push(Pending {
                node: right,
                rows: right_rows,
                depth: depth + 1,
            });
            stack.push(Pending {
                node: left,
                rows: left_rows,
                depth: depth + 1,
            });
        }

        tree
    }

    /// Index of the leaf `row` falls into.
    pub fn leaf_of(&self, row: &[f64]) -> usize {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf { .. } => return at,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => at = if row[feature] <= threshold { left } else { right },
            }
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self.nodes[self.leaf_of(row)] {
            Node::Leaf { value } => value,
            Node::Split { .. } => f64::NAN,
        }
    }

    /// Replace a leaf's output; ignored for split nodes.
    pub fn set_leaf_value(&mut self, leaf: usize, new_value: f64) {
        if let Some(Node::Leaf { value }) = self.nodes.get_mut(leaf) {
            *value = new_value;
        }
    }

    /// Impurity decrease per feature scaled to sum to one, or all zeros for a stump.
    pub fn normalized_importances(&self) -> Vec<f64> {
        normalize(self.impurity_decrease.clone())
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

pub(crate) fn normalize(mut values: Vec<f64>) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter_mut().for_each(|v| *v /= total);
    }
    values
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn best_split<R: Rng + ?Sized>(
    x: &[Vec<f64>],
    y: &[f64],
    rows: &[usize],
    n_features: usize,
    max_features: usize,
    rng: &mut R,
) -> Option<BestSplit> {
    let n = rows.len() as f64;
    let total: f64 = rows.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n;

    let amount = max_features.max(1).min(n_features);
    let candidates = index::sample(rng, n_features, amount);
    let mut best: Option<BestSplit> = None;
    let mut ordered: Vec<(f64, f64)> = Vec::with_capacity(rows.len());

    for feature in candidates.iter() {
        ordered.clear();
        ordered.extend(rows.iter().map(|&i| (x[i][feature], y[i])));
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for k in 0..ordered.len() - 1 {
            left_sum += ordered[k].1;
            let (lo, hi) = (ordered[k].0, ordered[k + 1].0);
            if lo == hi {
                continue;
            }
            let left_n = (k + 1) as f64;
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / left_n + right_sum * right_sum / (n - left_n);
            // weighted squared-error decrease of this split
            let gain = score - parent_score;
            if gain > best.as_ref().map_or(1e-12 * n, |b| b.gain) {
                let mid = lo + (hi - lo) / 2.0;
                best = Some(BestSplit {
                    feature,
                    threshold: if mid < hi { mid } else { lo },
                    gain,
                });
            }
        }
    }

    best
}
