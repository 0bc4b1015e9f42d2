//! Global feature ranking from SHAP values.

use super::shap::ShapValues;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub mean_abs_shap: f64,
    /// Signed mean: which way the feature pushes predictions on average.
    pub mean_shap: f64,
}

/// Features ranked by mean |SHAP|, largest first (ties by name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapSummary {
    pub n_rows: usize,
    pub expected_value: f64,
    pub features: Vec<FeatureImportance>,
}

impl ShapSummary {
    pub fn from_values(shap: &ShapValues) -> Self {
        let n = shap.n_rows();
        let mut features: Vec<FeatureImportance> = shap
            .feature_names()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let (abs_sum, sum) = shap
                    .rows()
                    .map(|r| r[j])
                    .fold((0.0, 0.0), |(a, s), v| (a + v.abs(), s + v));
                let denom = n.max(1) as f64;
                FeatureImportance {
                    feature: name.clone(),
                    mean_abs_shap: abs_sum / denom,
                    mean_shap: sum / denom,
                }
            })
            .collect();
        features.sort_by(|a, b| {
            b.mean_abs_shap
                .total_cmp(&a.mean_abs_shap)
                .then_with(|| a.feature.cmp(&b.feature))
        });

        Self {
            n_rows: n,
            expected_value: shap.expected_value(),
            features,
        }
    }

    pub fn top(&self, n: usize) -> &[FeatureImportance] {
        &self.features[..n.min(self.features.len())]
    }

    /// One row per feature: `rank,feature,mean_abs_shap,mean_shap`.
    pub fn write_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(["rank", "feature", "mean_abs_shap", "mean_shap"])?;
        for (i, f) in self.features.iter().enumerate() {
            wtr.write_record([
                (i + 1).to_string(),
                f.feature.clone(),
                f.mean_abs_shap.to_string(),
                f.mean_shap.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl fmt::Display for ShapSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .features
            .iter()
            .map(|x| x.feature.len())
            .max()
            .unwrap_or(7)
            .max(7);
        writeln!(
            f,
            "{:>4}  {:<width$}  {:>12}  {:>12}",
            "rank", "feature", "mean|SHAP|", "mean SHAP"
        )?;
        for (i, x) in self.features.iter().enumerate() {
            writeln!(
                f,
                "{:>4}  {:<width$}  {:>12.6}  {:>12.6}",
                i + 1,
                x.feature,
                x.mean_abs_shap,
                x.mean_shap
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explain::TreeExplainer;
    use crate::model::{Booster, FeatureMatrix, Node, Tree};

    fn shap_for(rows: &[Vec<f64>]) -> ShapValues {
        // f1 drives the output, f0 is never split on.
        let tree = Tree::from_nodes(vec![
            Node::Split {
                feature: 1,
                threshold: 0.0,
                left: 1,
                right: 2,
                default_left: true,
                gain: 1.0,
                cover: 2.0,
            },
            Node::Leaf {
                value: -1.0,
                cover: 1.0,
            },
            Node::Leaf {
                value: 1.0,
                cover: 1.0,
            },
        ]);
        let booster = Booster {
            feature_names: vec!["quiet".into(), "loud".into()],
            base_score: 0.5,
            trees: vec![tree],
            best_iteration: None,
            best_score: None,
        };
        let x = FeatureMatrix::from_rows(booster.feature_names.clone(), rows).unwrap();
        TreeExplainer::from_booster(&booster).shap_values(&x).unwrap()
    }

    #[test]
    fn ranks_by_mean_absolute_value() {
        let shap = shap_for(&[vec![0.0, -1.0], vec![0.0, 1.0], vec![0.0, 2.0]]);
        let summary = ShapSummary::from_values(&shap);

        assert_eq!(summary.features[0].feature, "loud");
        assert!((summary.features[0].mean_abs_shap - 1.0).abs() < 1e-12);
        assert!((summary.features[0].mean_shap - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.features[1].mean_abs_shap, 0.0);
        assert_eq!(summary.top(1).len(), 1);
        assert_eq!(summary.top(10).len(), 2);
    }

    #[test]
    fn csv_export() {
        let summary = ShapSummary::from_values(&shap_for(&[vec![0.0, 1.0]]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shap_summary.csv");
        summary.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("rank,feature,mean_abs_shap,mean_shap"));
        assert!(lines.next().unwrap().starts_with("1,loud,"));
        assert!(lines.next().unwrap().starts_with("2,quiet,"));
    }

    #[test]
    fn display_lists_every_feature() {
        let summary = ShapSummary::from_values(&shap_for(&[vec![0.0, 1.0]]));
        let table = summary.to_string();
        assert!(table.contains("loud"));
        assert!(table.contains("quiet"));
        assert_eq!(table.lines().count(), 3);
    }
}
