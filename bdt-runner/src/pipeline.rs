//! End-to-end run: load, prepare, train, evaluate, explain.

use bdt_core::data::{load_macro, load_prices, load_technicals, DataError, TableFetcher};
use bdt_core::prep::{
    clean, create_target_with_report, merge, temporal_split, MergeOptions, PrepError,
};
use chrono::Utc;
use polars::prelude::DataFrame;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::explain::{check_stability, ShapSummary, StabilityReport, TreeExplainer};
use crate::model::{labels_from_frame, FeatureMatrix, FeatureSet, GbmClassifier, ModelError};
use crate::report::{PipelineReport, StageCounts, SCHEMA_VERSION};

/// How many features the report keeps in `top_features`.
pub const TOP_FEATURES: usize = 10;

/// Errors from a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("preprocessing error: {0}")]
    Prep(#[from] PrepError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("price table is absent or empty")]
    MissingPrices,

    #[error("{0} partition is empty after labeling and splitting")]
    EmptyPartition(&'static str),

    #[error("no numeric feature columns in the training partition")]
    NoFeatures,

    #[error("unsupported report schema version {found} (max supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Run every stage against `fetcher` and return the report.
///
/// Nothing is written to disk except through the fetcher's cache; call
/// [`PipelineReport::save_artifacts`] to persist the outputs.
pub fn run_pipeline(
    config: &PipelineConfig,
    fetcher: &TableFetcher,
) -> Result<PipelineReport, PipelineError> {
    config.validate()?;
    let data = &config.data;

    let prices = load_prices(fetcher, data.tickers.as_slice(), data.start_date, data.force_reload)?
        .filter(|p| p.height() > 0)
        .ok_or(PipelineError::MissingPrices)?;
    let technicals = load_technicals(fetcher, data.tickers.as_slice(), data.force_reload)?;
    let macro_table = load_macro(fetcher, data.force_reload)?;
    info!(
        prices = prices.height(),
        technicals = ?technicals.as_ref().map(DataFrame::height),
        macro_rows = ?macro_table.as_ref().map(DataFrame::height),
        "loaded tables"
    );

    let cleaned = clean(&prices)?;
    let merged = merge(
        &cleaned,
        technicals.as_ref(),
        macro_table.as_ref(),
        &MergeOptions::new(config.prep.macro_key),
    )?;
    let (labeled, label) = create_target_with_report(&merged, config.prep.horizon)?;
    let split = temporal_split(&labeled, config.prep.split_ratios())?;
    let (n_train, n_val, n_test) = split.sizes();
    if n_train == 0 {
        return Err(PipelineError::EmptyPartition("train"));
    }
    if n_test == 0 {
        return Err(PipelineError::EmptyPartition("test"));
    }

    let features = FeatureSet::from_frame(&split.train);
    if features.is_empty() {
        return Err(PipelineError::NoFeatures);
    }
    info!(features = features.len(), "selected feature columns");

    let x_train = features.matrix(&split.train)?;
    let y_train = labels_from_frame(&split.train)?;
    let val = if n_val > 0 {
        Some((features.matrix(&split.val)?, labels_from_frame(&split.val)?))
    } else {
        warn!("validation partition is empty, training without early stopping set");
        None
    };
    let x_test = features.matrix(&split.test)?;
    let y_test = labels_from_frame(&split.test)?;

    let mut model = GbmClassifier::new(config.model.clone());
    model.train(
        &x_train,
        &y_train,
        val.as_ref().map(|(x, _)| x),
        val.as_ref().map(|(_, y)| y.as_slice()),
    )?;

    let test_metrics = model.evaluate(&x_test, &y_test)?;
    let val_metrics = val
        .as_ref()
        .map(|(x, y)| model.evaluate(x, y))
        .transpose()?;
    info!(
        auc = ?test_metrics.auc,
        accuracy = test_metrics.accuracy,
        "test metrics"
    );

    let sample = x_test.head(config.explain.sample_rows);
    let (summary, stability) = explain(&model, &sample, config)?;

    let booster = model.trees()?;
    let (best_iteration, best_score, n_trees) =
        (booster.best_iteration, booster.best_score, booster.trees.len());

    Ok(PipelineReport {
        schema_version: SCHEMA_VERSION,
        generated_at: Utc::now().naive_utc(),
        horizon: config.prep.horizon,
        rows: StageCounts {
            prices: prices.height(),
            technicals: technicals.as_ref().map(DataFrame::height),
            macro_rows: macro_table.as_ref().map(DataFrame::height),
            cleaned: cleaned.height(),
            merged: merged.height(),
            labeled: labeled.height(),
            train: n_train,
            val: n_val,
            test: n_test,
        },
        label,
        train_end: split.train_end,
        val_end: split.val_end,
        features: features.names().to_vec(),
        test_metrics,
        val_metrics,
        best_iteration,
        best_score,
        n_trees,
        top_features: summary.top(TOP_FEATURES).to_vec(),
        stability,
        shap_summary: Some(summary),
        model,
    })
}

fn explain(
    model: &GbmClassifier,
    sample: &FeatureMatrix,
    config: &PipelineConfig,
) -> Result<(ShapSummary, StabilityReport), PipelineError> {
    let explainer = TreeExplainer::new(model)?;
    let shap = explainer.shap_values(sample)?;
    let summary = ShapSummary::from_values(&shap);
    let stability = check_stability(&explainer, sample, config.explain.stability())?;
    info!(
        rows = sample.n_rows(),
        expected_value = explainer.expected_value(),
        stability = stability.score,
        "explained test sample"
    );
    Ok((summary, stability))
}
