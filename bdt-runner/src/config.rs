//! Pipeline configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration. `validate()` runs before any data is touched.

use std::path::{Path, PathBuf};

use bdt_core::data::StoreConfig;
use bdt_core::prep::{MacroKey, SplitRatios, DEFAULT_HORIZON};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::explain::StabilityConfig;
use crate::model::GbmParams;

/// Errors from loading or validating a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub data: DataConfig,
    pub prep: PrepConfig,
    pub model: GbmParams,
    pub explain: ExplainConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Empty means every ticker in the store.
    pub tickers: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub cache_dir: PathBuf,
    pub force_reload: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
            start_date: None,
            cache_dir: PathBuf::from("data"),
            force_reload: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    pub horizon: usize,
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub macro_key: MacroKey,
}

impl Default for PrepConfig {
    fn default() -> Self {
        let ratios = SplitRatios::default();
        Self {
            horizon: DEFAULT_HORIZON,
            train_ratio: ratios.train,
            val_ratio: ratios.val,
            macro_key: MacroKey::Name,
        }
    }
}

impl PrepConfig {
    pub fn split_ratios(&self) -> SplitRatios {
        SplitRatios::new(self.train_ratio, self.val_ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainConfig {
    /// Test rows explained, taken from the start of the test partition.
    pub sample_rows: usize,
    pub n_perturbations: usize,
    pub noise_std: f64,
    pub seed: u64,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        let stability = StabilityConfig::default();
        Self {
            sample_rows: 500,
            n_perturbations: stability.n_perturbations,
            noise_std: stability.noise_std,
            seed: stability.seed,
        }
    }
}

impl ExplainConfig {
    pub fn stability(&self) -> StabilityConfig {
        StabilityConfig {
            n_perturbations: self.n_perturbations,
            noise_std: self.noise_std,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("results"),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prep.horizon == 0 {
            return Err(ConfigError::Invalid(
                "prep.horizon must be at least 1".into(),
            ));
        }
        self.prep
            .split_ratios()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("prep: {e}")))?;
        self.model
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("model: {e}")))?;
        if self.explain.sample_rows == 0 {
            return Err(ConfigError::Invalid(
                "explain.sample_rows must be at least 1".into(),
            ));
        }
        if !(self.explain.noise_std.is_finite() && self.explain.noise_std >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "explain.noise_std must be >= 0, got {}",
                self.explain.noise_std
            )));
        }
        if let Some(t) = self.data.tickers.iter().find(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "data.tickers contains a blank entry: {t:?}"
            )));
        }
        Ok(())
    }
}
