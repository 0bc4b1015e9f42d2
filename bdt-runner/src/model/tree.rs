//! Regression trees fitted to second-order gradient statistics.
//!
//! Trees are stored as a flat arena with the root at index 0. A row goes
//! left when `x[feature] < threshold`; a missing (`NaN`) value follows the
//! split's learned default direction. Every node records its cover (sum of
//! hessians of the training rows that reached it), which the tree SHAP
//! explainer uses as the background distribution.

use super::dataset::FeatureMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        default_left: bool,
        gain: f64,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Build a tree from an arena. Child indices must point inside it.
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Index of the child `row` descends into from split `index`.
    /// Returns `None` for a leaf.
    pub fn next_node(&self, index: usize, row: &[f64]) -> Option<usize> {
        match &self.nodes[index] {
            Node::Leaf { .. } => None,
            Node::Split {
                feature,
                threshold,
                left,
                right,
                default_left,
                ..
            } => {
                let v = row[*feature];
                let go_left = if v.is_nan() {
                    *default_left
                } else {
                    v < *threshold
                };
                Some(if go_left { *left } else { *right })
            }
        }
    }

    /// Leaf value reached by `row`.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        while let Some(next) = self.next_node(index, row) {
            index = next;
        }
        match &self.nodes[index] {
            Node::Leaf { value, .. } => *value,
            Node::Split { .. } => 0.0,
        }
    }

    /// Cover-weighted mean leaf value: the tree's output averaged over the
    /// training distribution.
    pub fn expected_value(&self) -> f64 {
        self.subtree_mean(0)
    }

    fn subtree_mean(&self, index: usize) -> f64 {
        match &self.nodes[index] {
            Node::Leaf { value, .. } => *value,
            Node::Split {
                left, right, cover, ..
            } => {
                if *cover <= 0.0 {
                    return 0.0;
                }
                let l = self.nodes[*left].cover();
                let r = self.nodes[*right].cover();
                (l * self.subtree_mean(*left) + r * self.subtree_mean(*right)) / cover
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(tree: &Tree, index: usize) -> usize {
            match tree.node(index) {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(tree, *left).max(walk(tree, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(self, 0)
        }
    }

    /// Total split gain per feature, indexed by feature.
    pub fn accumulate_gain(&self, totals: &mut [f64]) {
        for node in &self.nodes {
            if let Node::Split { feature, gain, .. } = node {
                if let Some(t) = totals.get_mut(*feature) {
                    *t += gain;
                }
            }
        }
    }
}

/// Knobs that shape a single tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub reg_lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
}

/// Candidate split for one node.
#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    default_left: bool,
    gain: f64,
}

impl SplitCandidate {
    /// Higher gain wins; equal gains go to the lower feature index, so the
    /// parallel search agrees with a sequential scan.
    fn better(self, other: Self) -> Self {
        if other.gain > self.gain || (other.gain == self.gain && other.feature < self.feature) {
            other
        } else {
            self
        }
    }
}

/// Exact greedy tree builder over a fixed sample of rows and features.
pub(crate) struct TreeBuilder<'a> {
    x: &'a FeatureMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: TreeParams,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        x: &'a FeatureMatrix,
        grad: &'a [f64],
        hess: &'a [f64],
        features: &'a [usize],
        params: TreeParams,
    ) -> Self {
        Self {
            x,
            grad,
            hess,
            features,
            params,
            nodes: Vec::new(),
        }
    }

    pub fn build(mut self, rows: Vec<usize>) -> Tree {
        self.grow(rows, 0);
        Tree { nodes: self.nodes }
    }

    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -g / (h + self.params.reg_lambda)
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.reg_lambda)
    }

    /// Append the subtree for `rows` and return its index.
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let (g, h) = rows
            .iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]));

        let index = self.nodes.len();
        let leaf = Node::Leaf {
            value: self.leaf_weight(g, h) * self.params.learning_rate,
            cover: h,
        };
        self.nodes.push(leaf);

        let splittable = depth < self.params.max_depth
            && rows.len() >= 2
            && h >= 2.0 * self.params.min_child_weight;
        if !splittable {
            return index;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return index;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&i| {
            let v = self.x.get(i, split.feature);
            if v.is_nan() {
                split.default_left
            } else {
                v < split.threshold
            }
        });
        drop(rows);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
            default_left: split.default_left,
            gain: split.gain,
            cover: h,
        };
        index
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let parent = self.score(g, h);
        self.features
            .par_iter()
            .filter_map(|&f| self.best_split_for(f, rows, g, h, parent))
            .reduce_with(SplitCandidate::better)
    }

    /// Scan one feature's sorted values, trying missing values on each side.
    fn best_split_for(
        &self,
        feature: usize,
        rows: &[usize],
        g: f64,
        h: f64,
        parent: f64,
    ) -> Option<SplitCandidate> {
        let mut present: Vec<(f64, usize)> = Vec::with_capacity(rows.len());
        let (mut g_missing, mut h_missing) = (0.0, 0.0);
        for &i in rows {
            let v = self.x.get(i, feature);
            if v.is_nan() {
                g_missing += self.grad[i];
                h_missing += self.hess[i];
            } else {
                present.push((v, i));
            }
        }
        if present.len() < 2 {
            return None;
        }
        present.sort_by(|a, b| a.0.total_cmp(&b.0));

        let min_child = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;
        let (mut gl, mut hl) = (0.0, 0.0);

        for k in 0..present.len() - 1 {
            let (v, i) = present[k];
            gl += self.grad[i];
            hl += self.hess[i];
            let next = present[k + 1].0;
            if next <= v {
                continue;
            }
            let mut threshold = v + (next - v) / 2.0;
            if threshold <= v {
                threshold = next;
            }

            // Missing values right, then missing values left.
            let options = [(gl, hl, false), (gl + g_missing, hl + h_missing, true)];
            let n_options = if h_missing > 0.0 { 2 } else { 1 };
            for &(gl_, hl_, default_left) in &options[..n_options] {
                let (gr_, hr_) = (g - gl_, h - hl_);
                if hl_ < min_child || hr_ < min_child {
                    continue;
                }
                let gain =
                    0.5 * (self.score(gl_, hl_) + self.score(gr_, hr_) - parent) - self.params.gamma;
                if gain > 0.0 && best.map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        default_left,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            learning_rate: 1.0,
            reg_lambda: 0.0,
            gamma: 0.0,
            min_child_weight: 0.0,
        }
    }

    fn matrix(rows: &[Vec<f64>]) -> FeatureMatrix {
        let names = (0..rows[0].len()).map(|j| format!("f{j}")).collect();
        FeatureMatrix::from_rows(names, rows).unwrap()
    }

    #[test]
    fn splits_on_the_informative_feature() {
        // f1 separates the gradients, f0 is noise.
        let x = matrix(&[
            vec![5.0, 1.0],
            vec![1.0, 2.0],
            vec![4.0, 10.0],
            vec![2.0, 11.0],
        ]);
        let grad = [1.0, 1.0, -1.0, -1.0];
        let hess = [1.0; 4];
        let tree = TreeBuilder::new(&x, &grad, &hess, &[0, 1], params(1)).build(vec![0, 1, 2, 3]);

        match tree.node(0) {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 1);
                assert_eq!(*threshold, 6.0);
            }
            other => panic!("expected split, got {other:?}"),
        }
        assert_eq!(tree.predict_row(&[0.0, 1.5]), -1.0);
        assert_eq!(tree.predict_row(&[0.0, 10.5]), 1.0);
    }

    #[test]
    fn missing_values_learn_a_direction() {
        let x = matrix(&[vec![1.0], vec![2.0], vec![10.0], vec![f64::NAN]]);
        // The missing row behaves like the high rows.
        let grad = [1.0, 1.0, -1.0, -1.0];
        let hess = [1.0; 4];
        let tree = TreeBuilder::new(&x, &grad, &hess, &[0], params(1)).build(vec![0, 1, 2, 3]);

        match tree.node(0) {
            Node::Split { default_left, .. } => assert!(!default_left),
            other => panic!("expected split, got {other:?}"),
        }
        assert_eq!(tree.predict_row(&[f64::NAN]), tree.predict_row(&[10.0]));
    }

    #[test]
    fn depth_limit_and_cover() {
        let rows: Vec<Vec<f64>> = (0..16).map(|i| vec![i as f64]).collect();
        let x = matrix(&rows);
        let grad: Vec<f64> = (0..16).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let hess = vec![0.25; 16];
        let tree = TreeBuilder::new(&x, &grad, &hess, &[0], params(2)).build((0..16).collect());

        assert!(tree.depth() <= 2);
        assert_eq!(tree.node(0).cover(), 4.0);
        for node in tree.nodes() {
            if let Node::Split {
                left, right, cover, ..
            } = node
            {
                let sum = tree.node(*left).cover() + tree.node(*right).cover();
                assert!((sum - cover).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn constant_feature_yields_a_leaf() {
        let x = matrix(&[vec![1.0], vec![1.0], vec![1.0]]);
        let tree = TreeBuilder::new(&x, &[1.0, -1.0, 1.0], &[1.0; 3], &[0], params(3))
            .build(vec![0, 1, 2]);
        assert_eq!(tree.n_leaves(), 1);
        assert!((tree.predict_row(&[1.0]) - (-1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn expected_value_is_cover_weighted() {
        let tree = Tree::from_nodes(vec![
            Node::Split {
                feature: 0,
                threshold: 0.5,
                left: 1,
                right: 2,
                default_left: true,
                gain: 1.0,
                cover: 4.0,
            },
            Node::Leaf {
                value: 1.0,
                cover: 3.0,
            },
            Node::Leaf {
                value: -1.0,
                cover: 1.0,
            },
        ]);
        assert!((tree.expected_value() - 0.5).abs() < 1e-12);
        let mut gains = vec![0.0; 2];
        tree.accumulate_gain(&mut gains);
        assert_eq!(gains, vec![1.0, 0.0]);
    }
}
