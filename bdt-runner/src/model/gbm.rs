//! Gradient-boosted trees for binary classification.
//!
//! Logistic loss, second-order (gradient + hessian) leaf weights, exact
//! greedy splits with a learned default direction for missing values.
//! Training tracks AUC on each eval set and stops early when the last eval
//! set stops improving, keeping the best iteration.

use super::dataset::FeatureMatrix;
use super::metrics::{accuracy, roc_auc};
use super::tree::{Tree, TreeBuilder, TreeParams};
use super::ModelError;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Hessians are floored here so leaf weights stay finite.
const MIN_HESSIAN: f64 = 1e-16;

/// Booster hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub n_estimators: usize,
    /// Stop after this many rounds without improvement. `None` disables.
    pub early_stopping_rounds: Option<usize>,
    pub random_state: u64,
    /// L2 penalty on leaf weights.
    pub reg_lambda: f64,
    /// Minimum gain required to keep a split.
    pub gamma: f64,
    pub min_child_weight: f64,
    /// Fraction of rows sampled per tree.
    pub subsample: f64,
    /// Fraction of features sampled per tree.
    pub colsample_bytree: f64,
    /// Log eval metrics every this many rounds (0 = never).
    pub log_every: usize,
}

impl Default for GbmParams {
    fn default() -> Self {
        Self {
            max_depth: 4,
            learning_rate: 0.05,
            n_estimators: 500,
            early_stopping_rounds: Some(50),
            random_state: 42,
            reg_lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            log_every: 50,
        }
    }
}

impl GbmParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        let bad = |msg: String| Err(ModelError::InvalidData(msg));
        if self.n_estimators == 0 {
            return bad("n_estimators must be at least 1".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return bad(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.reg_lambda.is_finite() && self.reg_lambda >= 0.0) {
            return bad(format!("reg_lambda must be >= 0, got {}", self.reg_lambda));
        }
        if !(self.gamma.is_finite() && self.gamma >= 0.0) {
            return bad(format!("gamma must be >= 0, got {}", self.gamma));
        }
        if !(self.min_child_weight.is_finite() && self.min_child_weight >= 0.0) {
            return bad(format!(
                "min_child_weight must be >= 0, got {}",
                self.min_child_weight
            ));
        }
        for (name, v) in [
            ("subsample", self.subsample),
            ("colsample_bytree", self.colsample_bytree),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return bad(format!("{name} must be in (0, 1], got {v}"));
            }
        }
        Ok(())
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            reg_lambda: self.reg_lambda,
            gamma: self.gamma,
            min_child_weight: self.min_child_weight,
        }
    }
}

/// A fitted ensemble. Margins are `base_margin + Σ tree outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    pub feature_names: Vec<String>,
    /// Initial prediction in probability space.
    pub base_score: f64,
    pub trees: Vec<Tree>,
    /// Zero-based round that scored best on the last eval set.
    pub best_iteration: Option<usize>,
    pub best_score: Option<f64>,
}

impl Booster {
    pub fn base_margin(&self) -> f64 {
        logit(self.base_score)
    }

    pub fn predict_margin_row(&self, row: &[f64]) -> f64 {
        self.base_margin() + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    /// Total split gain per feature, as (name, gain), highest first.
    pub fn feature_gain(&self) -> Vec<(String, f64)> {
        let mut totals = vec![0.0; self.feature_names.len()];
        for tree in &self.trees {
            tree.accumulate_gain(&mut totals);
        }
        let mut ranked: Vec<(String, f64)> =
            self.feature_names.iter().cloned().zip(totals).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

/// Test-set metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// `None` when the evaluated labels contain a single class.
    pub auc: Option<f64>,
    pub accuracy: f64,
}

impl EvalMetrics {
    /// `{"AUC": .., "Accuracy": ..}`; AUC is left out when undefined.
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        let mut map = BTreeMap::new();
        if let Some(auc) = self.auc {
            map.insert("AUC".to_string(), auc);
        }
        map.insert("Accuracy".to_string(), self.accuracy);
        map
    }
}

/// Binary classifier wrapper: parameters plus, once trained, the booster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GbmClassifier {
    params: GbmParams,
    booster: Option<Booster>,
}

struct EvalSet<'a> {
    name: &'static str,
    x: &'a FeatureMatrix,
    y: &'a [i32],
    margins: Vec<f64>,
}

impl GbmClassifier {
    pub fn new(params: GbmParams) -> Self {
        Self {
            params,
            booster: None,
        }
    }

    pub fn params(&self) -> &GbmParams {
        &self.params
    }

    pub fn is_trained(&self) -> bool {
        self.booster.is_some()
    }

    /// The fitted ensemble.
    pub fn trees(&self) -> Result<&Booster, ModelError> {
        self.booster.as_ref().ok_or(ModelError::NotTrained)
    }

    /// Fit on `(x_train, y_train)`. The eval sets are train and, when given,
    /// validation; early stopping watches the last one.
    pub fn train(
        &mut self,
        x_train: &FeatureMatrix,
        y_train: &[i32],
        x_val: Option<&FeatureMatrix>,
        y_val: Option<&[i32]>,
    ) -> Result<&Booster, ModelError> {
        self.params.validate()?;
        check_labeled(x_train, y_train, "train")?;
        if x_train.n_cols() == 0 {
            return Err(ModelError::InvalidData("no feature columns".into()));
        }

        let base_score = 0.5;
        let base_margin = logit(base_score);
        let mut eval_sets = vec![EvalSet {
            name: "train",
            x: x_train,
            y: y_train,
            margins: vec![base_margin; x_train.n_rows()],
        }];
        match (x_val, y_val) {
            (Some(x), Some(y)) if !x.is_empty() => {
                check_labeled(x, y, "val")?;
                check_columns(x_train.names(), x)?;
                eval_sets.push(EvalSet {
                    name: "val",
                    x,
                    y,
                    margins: vec![base_margin; x.n_rows()],
                });
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(ModelError::InvalidData(
                    "validation features and labels must be given together".into(),
                ))
            }
            _ => {}
        }

        let params = &self.params;
        let n_rows = x_train.n_rows();
        let n_cols = x_train.n_cols();
        let rows_per_tree = ((n_rows as f64 * params.subsample).round() as usize).clamp(1, n_rows);
        let cols_per_tree =
            ((n_cols as f64 * params.colsample_bytree).round() as usize).clamp(1, n_cols);
        let labels: Vec<f64> = y_train.iter().map(|&y| f64::from(y)).collect();
        let mut rng = StdRng::seed_from_u64(params.random_state);

        let mut trees: Vec<Tree> = Vec::with_capacity(params.n_estimators);
        let mut best: Option<(usize, f64)> = None;
        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];

        for round in 0..params.n_estimators {
            for (i, &m) in eval_sets[0].margins.iter().enumerate() {
                let p = sigmoid(m);
                grad[i] = p - labels[i];
                hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let rows = sample_sorted(&mut rng, n_rows, rows_per_tree);
            let features = sample_sorted(&mut rng, n_cols, cols_per_tree);
            let tree = TreeBuilder::new(x_train, &grad, &hess, &features, params.tree_params())
                .build(rows);

            let mut scores = Vec::with_capacity(eval_sets.len());
            for set in &mut eval_sets {
                for (i, m) in set.margins.iter_mut().enumerate() {
                    *m += tree.predict_row(set.x.row(i));
                }
                let probs: Vec<f64> = set.margins.iter().map(|&m| sigmoid(m)).collect();
                scores.push((set.name, roc_auc(set.y, &probs)));
            }
            trees.push(tree);

            let last_round = round + 1 == params.n_estimators;
            if params.log_every > 0 && (round % params.log_every == 0 || last_round) {
                let line: Vec<String> = scores
                    .iter()
                    .map(|(name, auc)| match auc {
                        Some(a) => format!("{name}-auc:{a:.5}"),
                        None => format!("{name}-auc:undefined"),
                    })
                    .collect();
                info!(round, metrics = %line.join(" "), "boosting");
            }

            if let Some((_, Some(score))) = scores.last() {
                if best.map_or(true, |(_, b)| *score > b) {
                    best = Some((round, *score));
                }
            }
            if let (Some(patience), Some((best_round, best_score))) =
                (params.early_stopping_rounds, best)
            {
                if round - best_round >= patience {
                    info!(
                        round,
                        best_iteration = best_round,
                        best_score,
                        "early stopping"
                    );
                    break;
                }
            }
        }

        if let Some((best_round, _)) = best {
            trees.truncate(best_round + 1);
        }
        debug!(trees = trees.len(), "training finished");

        self.booster = Some(Booster {
            feature_names: x_train.names().to_vec(),
            base_score,
            trees,
            best_iteration: best.map(|(r, _)| r),
            best_score: best.map(|(_, s)| s),
        });
        self.trees()
    }

    /// Raw scores (log-odds) for each row.
    pub fn predict_margin(&self, x: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        let booster = self.trees()?;
        check_columns(&booster.feature_names, x)?;
        Ok(x.rows().map(|row| booster.predict_margin_row(row)).collect())
    }

    /// Probability of the positive class for each row.
    pub fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        Ok(self.predict_margin(x)?.into_iter().map(sigmoid).collect())
    }

    /// Class labels (`1` when the probability exceeds 0.5).
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<i32>, ModelError> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| i32::from(p > 0.5))
            .collect())
    }

    pub fn evaluate(&self, x: &FeatureMatrix, y: &[i32]) -> Result<EvalMetrics, ModelError> {
        check_labeled(x, y, "eval")?;
        let probs = self.predict_proba(x)?;
        let predicted: Vec<i32> = probs.iter().map(|&p| i32::from(p > 0.5)).collect();
        Ok(EvalMetrics {
            auc: roc_auc(y, &probs),
            accuracy: accuracy(y, &predicted),
        })
    }

    pub fn save_json(&self, path: &Path) -> Result<(), ModelError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, ModelError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

pub(crate) fn sigmoid(m: f64) -> f64 {
    1.0 / (1.0 + (-m).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// `k` distinct indices from `0..n`, ascending. Every index when `k >= n`.
fn sample_sorted(rng: &mut StdRng, n: usize, k: usize) -> Vec<usize> {
    if k >= n {
        return (0..n).collect();
    }
    let mut picked = sample(rng, n, k).into_vec();
    picked.sort_unstable();
    picked
}

fn check_labeled(x: &FeatureMatrix, y: &[i32], what: &str) -> Result<(), ModelError> {
    if x.is_empty() {
        return Err(ModelError::InvalidData(format!("{what} set is empty")));
    }
    if x.n_rows() != y.len() {
        return Err(ModelError::ShapeMismatch(format!(
            "{what}: {} rows but {} labels",
            x.n_rows(),
            y.len()
        )));
    }
    if let Some(bad) = y.iter().find(|&&v| v != 0 && v != 1) {
        return Err(ModelError::InvalidData(format!(
            "{what}: label {bad} is not 0 or 1"
        )));
    }
    Ok(())
}

fn check_columns(expected: &[String], x: &FeatureMatrix) -> Result<(), ModelError> {
    if expected != x.names() {
        return Err(ModelError::ShapeMismatch(format!(
            "model expects {} features {:?}, got {} {:?}",
            expected.len(),
            expected,
            x.n_cols(),
            x.names()
        )));
    }
    Ok(())
}
