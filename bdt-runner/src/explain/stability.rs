//! Explanation stability under small input noise.

use super::shap::TreeExplainer;
use crate::model::{FeatureMatrix, ModelError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub n_perturbations: usize,
    /// Standard deviation of the Gaussian noise added to every cell.
    pub noise_std: f64,
    pub seed: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            n_perturbations: 10,
            noise_std: 0.01,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    /// Mean over perturbations of the mean |φ_base − φ_perturbed|.
    /// Lower is more stable.
    pub score: f64,
    pub variations: Vec<f64>,
}

/// Perturb `x` with seeded Gaussian noise `n_perturbations` times and
/// measure how far the SHAP values move from the unperturbed ones.
pub fn check_stability(
    explainer: &TreeExplainer<'_>,
    x: &FeatureMatrix,
    config: StabilityConfig,
) -> Result<StabilityReport, ModelError> {
    if !(config.noise_std.is_finite() && config.noise_std >= 0.0) {
        return Err(ModelError::InvalidData(format!(
            "noise_std must be finite and non-negative, got {}",
            config.noise_std
        )));
    }
    let normal = Normal::new(0.0, config.noise_std).map_err(|e| {
        ModelError::InvalidData(format!("noise_std {}: {e}", config.noise_std))
    })?;
    let base = explainer.shap_values(x)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut variations = Vec::with_capacity(config.n_perturbations);
    for k in 0..config.n_perturbations {
        let perturbed = x.map_values(|v| v + normal.sample(&mut rng));
        let shap = explainer.shap_values(&perturbed)?;
        let diff = base.mean_abs_diff(&shap)?;
        debug!(perturbation = k, diff, "stability perturbation");
        variations.push(diff);
    }

    let score = if variations.is_empty() {
        0.0
    } else {
        variations.iter().sum::<f64>() / variations.len() as f64
    };
    Ok(StabilityReport { score, variations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Booster, Node, Tree};

    fn booster() -> Booster {
        Booster {
            feature_names: vec!["x".into()],
            base_score: 0.5,
            trees: vec![Tree::from_nodes(vec![
                Node::Split {
                    feature: 0,
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
            ])],
            best_iteration: None,
            best_score: None,
        }
    }

    #[test]
    fn far_from_threshold_is_perfectly_stable() {
        let b = booster();
        let explainer = TreeExplainer::from_booster(&b);
        let x = FeatureMatrix::from_rows(vec!["x".into()], &[vec![5.0], vec![-5.0]]).unwrap();

        let report = check_stability(&explainer, &x, StabilityConfig::default()).unwrap();
        assert_eq!(report.variations.len(), 10);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn near_threshold_moves_and_is_seeded() {
        let b = booster();
        let explainer = TreeExplainer::from_booster(&b);
        let x = FeatureMatrix::from_rows(vec!["x".into()], &vec![vec![0.0]; 20]).unwrap();
        let config = StabilityConfig {
            n_perturbations: 5,
            noise_std: 0.1,
            seed: 7,
        };

        let a = check_stability(&explainer, &x, config).unwrap();
        let b2 = check_stability(&explainer, &x, config).unwrap();
        assert!(a.score > 0.0);
        assert_eq!(a, b2);
    }

    #[test]
    fn negative_noise_is_rejected() {
        let b = booster();
        let explainer = TreeExplainer::from_booster(&b);
        let x = FeatureMatrix::from_rows(vec!["x".into()], &[vec![0.0]]).unwrap();
        let config = StabilityConfig {
            noise_std: -1.0,
            ..Default::default()
        };
        let err = check_stability(&explainer, &x, config).unwrap_err();
        assert!(matches!(err, ModelError::InvalidData(ref m) if m.contains("noise_std")));
    }

    #[test]
    fn non_finite_noise_is_rejected() {
        let b = booster();
        let explainer = TreeExplainer::from_booster(&b);
        let x = FeatureMatrix::from_rows(vec!["x".into()], &[vec![0.0]]).unwrap();
        for noise_std in [f64::NAN, f64::INFINITY] {
            let config = StabilityConfig {
                noise_std,
                ..Default::default()
            };
            assert!(matches!(
                check_stability(&explainer, &x, config),
                Err(ModelError::InvalidData(_))
            ));
        }
    }

    #[test]
    fn zero_noise_is_allowed_and_exact() {
        let b = booster();
        let explainer = TreeExplainer::from_booster(&b);
        let x = FeatureMatrix::from_rows(vec!["x".into()], &vec![vec![0.0]; 4]).unwrap();
        let config = StabilityConfig {
            n_perturbations: 3,
            noise_std: 0.0,
            seed: 1,
        };
        let report = check_stability(&explainer, &x, config).unwrap();
        assert_eq!(report.score, 0.0);
    }
}
