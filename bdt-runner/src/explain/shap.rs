//! Exact tree SHAP values for a fitted booster.
//!
//! Path-dependent algorithm: the background distribution is the one seen
//! in training, as recorded by node covers. Values are in margin
//! (log-odds) space, so for every row
//! `Σ_j φ_j + expected_value == predict_margin(row)`.

use crate::model::{Booster, FeatureMatrix, GbmClassifier, ModelError, Node, Tree};
use rayon::prelude::*;

/// Per-row, per-feature attributions.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapValues {
    feature_names: Vec<String>,
    /// Row-major, `n_rows × n_features`.
    values: Vec<f64>,
    n_rows: usize,
    expected_value: f64,
}

impl ShapValues {
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.n_features();
        &self.values[i * n..(i + 1) * n]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mean over all cells of `|self - other|`. Shapes must agree.
    pub fn mean_abs_diff(&self, other: &ShapValues) -> Result<f64, ModelError> {
        if self.values.len() != other.values.len() || self.n_rows != other.n_rows {
            return Err(ModelError::ShapeMismatch(format!(
                "shap values of {} and {} cells",
                self.values.len(),
                other.values.len()
            )));
        }
        if self.values.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).abs())
            .sum();
        Ok(total / self.values.len() as f64)
    }
}

/// Explains a trained classifier's margin output.
#[derive(Debug, Clone)]
pub struct TreeExplainer<'m> {
    booster: &'m Booster,
    expected_value: f64,
}

impl<'m> TreeExplainer<'m> {
    pub fn new(model: &'m GbmClassifier) -> Result<Self, ModelError> {
        Ok(Self::from_booster(model.trees()?))
    }

    pub fn from_booster(booster: &'m Booster) -> Self {
        let expected_value = booster.base_margin()
            + booster
                .trees
                .iter()
                .map(Tree::expected_value)
                .sum::<f64>();
        Self {
            booster,
            expected_value,
        }
    }

    /// Mean margin over the training distribution.
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub fn feature_names(&self) -> &[String] {
        &self.booster.feature_names
    }

    pub fn shap_values(&self, x: &FeatureMatrix) -> Result<ShapValues, ModelError> {
        let names = &self.booster.feature_names;
        if names.as_slice() != x.names() {
            return Err(ModelError::ShapeMismatch(format!(
                "explainer expects features {:?}, got {:?}",
                names,
                x.names()
            )));
        }

        let n_features = names.len();
        let mut values = vec![0.0; x.n_rows() * n_features];
        if n_features > 0 {
            values
                .par_chunks_mut(n_features)
                .enumerate()
                .for_each(|(i, phi)| {
                    let row = x.row(i);
                    for tree in &self.booster.trees {
                        tree_shap(tree, row, phi);
                    }
                });
        }

        Ok(ShapValues {
            feature_names: names.clone(),
            values,
            n_rows: x.n_rows(),
            expected_value: self.expected_value,
        })
    }
}

// ── Path bookkeeping ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` only for the root sentinel.
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Add `tree`'s contribution for `row` to `phi`.
fn tree_shap(tree: &Tree, row: &[f64], phi: &mut [f64]) {
    if tree.nodes().is_empty() {
        return;
    }
    recurse(tree, row, phi, 0, Vec::new(), 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    row: &[f64],
    phi: &mut [f64],
    node: usize,
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend_path(&mut path, zero_fraction, one_fraction, feature);

    let (split_feature, cover) = match tree.node(node) {
        Node::Leaf { value, .. } => {
            for i in 1..path.len() {
                let w = unwound_path_sum(&path, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                }
            }
            return;
        }
        Node::Split { feature, cover, .. } => (*feature, *cover),
    };

    let Some(hot) = tree.next_node(node, row) else {
        return;
    };
    let cold = match tree.node(node) {
        Node::Split { left, right, .. } if *left == hot => *right,
        Node::Split { left, .. } => *left,
        Node::Leaf { .. } => return,
    };
    let (hot_fraction, cold_fraction) = if cover > 0.0 {
        (
            tree.node(hot).cover() / cover,
            tree.node(cold).cover() / cover,
        )
    } else {
        (0.5, 0.5)
    };

    // A feature seen higher up the path is folded into a single element.
    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(split_feature)) {
        incoming_zero = path[k].zero_fraction;
        incoming_one = path[k].one_fraction;
        unwind_path(&mut path, k);
    }

    recurse(
        tree,
        row,
        phi,
        hot,
        path.clone(),
        hot_fraction * incoming_zero,
        incoming_one,
        Some(split_feature),
    );
    recurse(
        tree,
        row,
        phi,
        cold,
        path,
        cold_fraction * incoming_zero,
        0.0,
        Some(split_feature),
    );
}

fn extend_path(
    path: &mut Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let d = depth as f64;
    for i in (0..depth).rev() {
        let w = path[i].pweight;
        path[i + 1].pweight += one_fraction * w * (i as f64 + 1.0) / (d + 1.0);
        path[i].pweight = zero_fraction * w * (d - i as f64) / (d + 1.0);
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let d = depth as f64;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d + 1.0) / ((i as f64 + 1.0) * one);
            next_one_portion = tmp - path[i].pweight * zero * (d - i as f64) / (d + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (d + 1.0) / (zero * (d - i as f64));
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `index` removed.
fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let d = depth as f64;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next_one_portion * (d + 1.0) / ((i as f64 + 1.0) * one);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero * ((d - i as f64) / (d + 1.0));
        } else if zero != 0.0 {
            total += (path[i].pweight / zero) / ((d - i as f64) / (d + 1.0));
        }
    }
    total
}
