//! Preprocessing: clean, merge, label, split.
//!
//! Each stage takes a table and returns a new one. Nothing here does I/O.

pub mod clean;
pub mod label;
pub mod merge;
pub mod schema;
pub mod split;

pub use clean::clean;
pub use label::{create_target, create_target_with_report, LabelReport, DEFAULT_HORIZON};
pub use merge::{merge, MacroKey, MergeOptions};
pub use split::{temporal_split, SplitRatios, TemporalSplit};

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors from the preprocessing stages.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("required source '{0}' is absent or empty")]
    MissingRequiredSource(String),

    #[error("missing required column '{0}'")]
    MissingColumn(String),

    #[error("invalid date value '{0}'")]
    InvalidDate(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}
