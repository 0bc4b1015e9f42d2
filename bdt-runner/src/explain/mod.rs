//! Feature attributions for the trained classifier.

pub mod shap;
pub mod stability;
pub mod summary;

pub use shap::{ShapValues, TreeExplainer};
pub use stability::{check_stability, StabilityConfig, StabilityReport};
pub use summary::{FeatureImportance, ShapSummary};
