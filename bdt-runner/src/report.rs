//! Run report and artifact export.
//!
//! A run directory holds three files:
//! - `report.json`: the serialized [`PipelineReport`], schema-versioned
//! - `model.json`: the trained classifier
//! - `shap_summary.csv`: the full SHAP feature ranking
//!
//! Unknown schema versions are rejected on load.

use std::path::Path;

use bdt_core::prep::LabelReport;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::explain::{FeatureImportance, ShapSummary, StabilityReport};
use crate::model::{EvalMetrics, GbmClassifier};
use crate::pipeline::PipelineError;

/// Current schema version for `report.json`.
pub const SCHEMA_VERSION: u32 = 1;

pub const REPORT_FILE: &str = "report.json";
pub const MODEL_FILE: &str = "model.json";
pub const SHAP_SUMMARY_FILE: &str = "shap_summary.csv";

/// Row counts after each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub prices: usize,
    /// `None` when the table was absent.
    pub technicals: Option<usize>,
    pub macro_rows: Option<usize>,
    pub cleaned: usize,
    pub merged: usize,
    pub labeled: usize,
    pub train: usize,
    pub val: usize,
    pub test: usize,
}

/// Everything a run produced, minus the raw tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub generated_at: NaiveDateTime,
    pub horizon: usize,
    pub rows: StageCounts,
    pub label: LabelReport,
    pub train_end: Option<NaiveDate>,
    pub val_end: Option<NaiveDate>,
    pub features: Vec<String>,
    pub test_metrics: EvalMetrics,
    /// `None` when the validation partition was empty.
    pub val_metrics: Option<EvalMetrics>,
    pub best_iteration: Option<usize>,
    pub best_score: Option<f64>,
    pub n_trees: usize,
    pub top_features: Vec<FeatureImportance>,
    pub stability: StabilityReport,
    /// Written to `shap_summary.csv`, not to `report.json`.
    #[serde(skip)]
    pub shap_summary: Option<ShapSummary>,
    /// Written to `model.json`, not to `report.json`.
    #[serde(skip)]
    pub model: GbmClassifier,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl PipelineReport {
    /// Write `report.json`, `model.json` and `shap_summary.csv` into `dir`,
    /// creating it if needed.
    pub fn save_artifacts(&self, dir: &Path) -> Result<(), PipelineError> {
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(REPORT_FILE), json)?;

        self.model.save_json(&dir.join(MODEL_FILE))?;

        if let Some(summary) = &self.shap_summary {
            summary.write_csv(&dir.join(SHAP_SUMMARY_FILE))?;
        }
        Ok(())
    }

    /// Read `report.json` and `model.json` back from a run directory.
    ///
    /// The SHAP ranking is not reloaded; `top_features` carries its head.
    pub fn load_artifacts(dir: &Path) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(dir.join(REPORT_FILE))?;
        let mut report: PipelineReport = serde_json::from_str(&json)?;
        if report.schema_version > SCHEMA_VERSION {
            return Err(PipelineError::UnsupportedSchema {
                found: report.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        report.model = GbmClassifier::load_json(&dir.join(MODEL_FILE))?;
        Ok(report)
    }

    /// Short human-readable summary for the terminal.
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        let r = &self.rows;
        out.push_str(&format!(
            "Rows: prices {} -> cleaned {} -> merged {} -> labeled {}\n",
            r.prices, r.cleaned, r.merged, r.labeled
        ));
        out.push_str(&format!(
            "Split: train {} / val {} / test {} (train_end {}, val_end {})\n",
            r.train,
            r.val,
            r.test,
            fmt_date(self.train_end),
            fmt_date(self.val_end)
        ));
        if self.label.invalid_price > 0 {
            out.push_str(&format!(
                "Rejected {} rows with invalid prices\n",
                self.label.invalid_price
            ));
        }
        out.push_str(&format!(
            "Model: {} trees, best iteration {}\n",
            self.n_trees,
            self.best_iteration
                .map_or_else(|| "-".to_string(), |i| i.to_string())
        ));
        out.push_str(&format!(
            "Test: AUC {}  Accuracy {:.4}\n",
            self.test_metrics
                .auc
                .map_or_else(|| "n/a".to_string(), |a| format!("{a:.4}")),
            self.test_metrics.accuracy
        ));
        out.push_str(&format!("SHAP stability: {:.6}\n", self.stability.score));
        if !self.top_features.is_empty() {
            out.push_str("Top features:\n");
            for (i, f) in self.top_features.iter().enumerate() {
                out.push_str(&format!(
                    "  {:>2}. {:<24} {:.6}\n",
                    i + 1,
                    f.feature,
                    f.mean_abs_shap
                ));
            }
        }
        out
    }
}

fn fmt_date(d: Option<NaiveDate>) -> String {
    d.map_or_else(|| "-".to_string(), |d| d.to_string())
}
