//! Boosted-tree classifier and its evaluation metrics.

pub mod dataset;
pub mod gbm;
pub mod metrics;
pub mod tree;

pub use dataset::{labels_from_frame, FeatureMatrix, FeatureSet};
pub use gbm::{Booster, EvalMetrics, GbmClassifier, GbmParams};
pub use metrics::{accuracy, roc_auc};
pub use tree::{Node, Tree};

use thiserror::Error;

/// Errors from model training, prediction and persistence.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model has not been trained")]
    NotTrained,

    #[error("invalid training data: {0}")]
    InvalidData(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
