//! BDT Runner: model training, explanations and pipeline orchestration.
//!
//! This crate builds on `bdt-core` to provide:
//! - Native gradient-boosted tree classifier with early stopping
//! - ROC AUC and accuracy metrics
//! - Exact tree SHAP values, global ranking and stability check
//! - TOML pipeline configuration
//! - End-to-end pipeline run and artifact export

pub mod config;
pub mod explain;
pub mod model;
pub mod pipeline;
pub mod report;

pub use config::{ConfigError, PipelineConfig};
pub use explain::{
    check_stability, FeatureImportance, ShapSummary, ShapValues, StabilityConfig,
    StabilityReport, TreeExplainer,
};
pub use model::{
    accuracy, roc_auc, Booster, EvalMetrics, FeatureMatrix, FeatureSet, GbmClassifier, GbmParams,
    ModelError,
};
pub use pipeline::{run_pipeline, PipelineError};
pub use report::{PipelineReport, StageCounts};
