//! Plain configuration record passed in by a driver.
//!
//! Every field has a default, so a partial JSON/TOML document deserializes.
//! [`FitConfig::validate`] runs before any simulation or sampling.

use crate::error::{check_open_interval, Error, Result};
use crate::trials::Parameters;
use serde::{Deserialize, Serialize};

/// Prior family on a bounded parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorFamily {
    Uniform,
    /// Beta(a, b) rescaled to `(lower, upper)`.
    ScaledBeta { a: f64, b: f64 },
}

/// Family plus bounds for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamPrior {
    pub family: PriorFamily,
    pub lower: f64,
    pub upper: f64,
}

impl ParamPrior {
    pub fn uniform(lower: f64, upper: f64) -> Self {
        Self {
            family: PriorFamily::Uniform,
            lower,
            upper,
        }
    }
}

/// Observation noise: fixed, or a nuisance parameter with its own prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SigmaSpec {
    /// Use `FitConfig::observation_sigma`.
    Fixed,
    /// `sigma ~ HalfNormal(scale)`, sampled on the log scale.
    HalfNormal { scale: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorSpec {
    pub alpha: ParamPrior,
    /// `None` means `Uniform(0, beta_max)`.
    pub beta: Option<ParamPrior>,
    pub sigma: SigmaSpec,
}

impl Default for PriorSpec {
    fn default() -> Self {
        Self {
            alpha: ParamPrior::uniform(0.0, 1.0),
            beta: None,
            sigma: SigmaSpec::Fixed,
        }
    }
}

/// Observation likelihood family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LikelihoodKind {
    /// `reward_t ~ Normal(prediction_t, sigma)`.
    Gaussian,
    /// `reward_t ~ Beta(alpha, beta)` with rewards clipped into `(epsilon, 1 - epsilon)`.
    Beta { epsilon: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub trial_count: usize,
    pub true_alpha: Option<f64>,
    pub true_beta: Option<f64>,
    pub beta_max: f64,
    pub seed: u64,
    pub prior_spec: PriorSpec,
    pub warmup_count: usize,
    pub sample_count: usize,
    pub chain_count: usize,
    pub observation_sigma: f64,
    pub target_accept_prob: f64,
    pub max_tree_depth: usize,
    pub divergence_energy_threshold: f64,
    pub v_init: f64,
    pub likelihood: LikelihoodKind,
    /// Chains with a larger divergent fraction are flagged unreliable.
    pub max_divergence_fraction: f64,
    /// Mass of the equal-tailed credible interval.
    pub credible_mass: f64,
    pub rhat_threshold: f64,
    pub min_ess: f64,
    /// 0 means use rayon's global pool.
    pub num_threads: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            trial_count: 1000,
            true_alpha: None,
            true_beta: None,
            beta_max: 5.0,
            seed: 42,
            prior_spec: PriorSpec::default(),
            warmup_count: 500,
            sample_count: 1000,
            chain_count: 4,
            observation_sigma: 0.1,
            target_accept_prob: 0.8,
            max_tree_depth: 10,
            divergence_energy_threshold: 1000.0,
            v_init: 1.0,
            likelihood: LikelihoodKind::Gaussian,
            max_divergence_fraction: 0.05,
            credible_mass: 0.94,
            rhat_threshold: 1.05,
            min_ess: 100.0,
            num_threads: 0,
        }
    }
}

impl FitConfig {
    /// Prior on beta, defaulting to `Uniform(0, beta_max)`.
    pub fn beta_prior(&self) -> ParamPrior {
        self.prior_spec
            .beta
            .unwrap_or_else(|| ParamPrior::uniform(0.0, self.beta_max))
    }

    /// Ground truth, if both true parameters were supplied.
    pub fn truth(&self) -> Option<Parameters> {
        match (self.true_alpha, self.true_beta) {
            (Some(alpha), Some(beta)) => Some(Parameters::new(alpha, beta)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trial_count == 0 {
            return Err(Error::config("trial_count", "must be positive"));
        }
        if self.sample_count == 0 {
            return Err(Error::config("sample_count", "must be positive"));
        }
        if self.chain_count == 0 {
            return Err(Error::config("chain_count", "must be positive"));
        }
        if !(self.beta_max.is_finite() && self.beta_max > 0.0) {
            return Err(Error::config("beta_max", format!("must be positive, got {}", self.beta_max)));
        }
        if !(self.observation_sigma.is_finite() && self.observation_sigma > 0.0) {
            return Err(Error::config(
                "observation_sigma",
                format!("must be positive, got {}", self.observation_sigma),
            ));
        }
        if !(self.target_accept_prob > 0.0 && self.target_accept_prob < 1.0) {
            return Err(Error::config("target_accept_prob", "must lie in (0, 1)"));
        }
        if self.max_tree_depth == 0 || self.max_tree_depth > 16 {
            return Err(Error::config("max_tree_depth", "must lie in 1..=16"));
        }
        if !(self.divergence_energy_threshold > 0.0) {
            return Err(Error::config("divergence_energy_threshold", "must be positive"));
        }
        if !self.v_init.is_finite() {
            return Err(Error::config("v_init", "must be finite"));
        }
        if !(0.0..=1.0).contains(&self.max_divergence_fraction) {
            return Err(Error::config("max_divergence_fraction", "must lie in [0, 1]"));
        }
        if !(self.credible_mass > 0.0 && self.credible_mass < 1.0) {
            return Err(Error::config("credible_mass", "must lie in (0, 1)"));
        }
        if let LikelihoodKind::Beta { epsilon } = self.likelihood {
            if !(epsilon > 0.0 && epsilon < 0.5) {
                return Err(Error::config("likelihood.epsilon", "must lie in (0, 0.5)"));
            }
            if self.prior_spec.sigma != SigmaSpec::Fixed {
                return Err(Error::config(
                    "prior_spec.sigma",
                    "the beta likelihood has no noise scale to sample",
                ));
            }
        }

        validate_prior("alpha", &self.prior_spec.alpha, 1.0)?;
        validate_prior("beta", &self.beta_prior(), self.beta_max)?;
        if let SigmaSpec::HalfNormal { scale } = self.prior_spec.sigma {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(Error::config("prior_spec.sigma.scale", "must be positive"));
            }
        }

        if let Some(alpha) = self.true_alpha {
            check_open_interval("true_alpha", alpha, 0.0, 1.0)?;
        }
        if let Some(beta) = self.true_beta {
            check_open_interval("true_beta", beta, 0.0, self.beta_max)?;
        }
        Ok(())
    }
}

/// Prior bounds must be ordered and sit inside the parameter's domain `(0, upper_domain)`.
fn validate_prior(name: &str, prior: &ParamPrior, upper_domain: f64) -> Result<()> {
    if !(prior.lower >= 0.0 && prior.upper <= upper_domain && prior.lower < prior.upper) {
        return Err(Error::InvalidParameterDomain {
            name: format!("{name} prior bounds [{}, {}]", prior.lower, prior.upper),
            value: if prior.lower < 0.0 { prior.lower } else { prior.upper },
            lower: 0.0,
            upper: upper_domain,
        });
    }
    if let PriorFamily::ScaledBeta { a, b } = prior.family {
        if !(a > 0.0 && b > 0.0 && a.is_finite() && b.is_finite()) {
            return Err(Error::config(name, "scaled beta shape parameters must be positive"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        FitConfig::default().validate().unwrap();
        assert_eq!(FitConfig::default().beta_prior(), ParamPrior::uniform(0.0, 5.0));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let cfg: FitConfig = serde_json::from_str(
            r#"{ "trial_count": 200, "beta_max": 3.0, "likelihood": { "kind": "beta", "epsilon": 0.001 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.trial_count, 200);
        assert_eq!(cfg.chain_count, 4);
        assert_eq!(cfg.likelihood, LikelihoodKind::Beta { epsilon: 0.001 });
        assert_eq!(cfg.beta_prior().upper, 3.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_counts_and_bounds() {
        let mut cfg = FitConfig { trial_count: 0, ..FitConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig { .. })));

        cfg = FitConfig { beta_max: -1.0, ..FitConfig::default() };
        assert!(cfg.validate().is_err());

        cfg = FitConfig::default();
        cfg.prior_spec.alpha = ParamPrior::uniform(0.0, 1.5);
        assert!(matches!(cfg.validate(), Err(Error::InvalidParameterDomain { .. })));

        cfg = FitConfig { true_alpha: Some(1.0), ..FitConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::InvalidParameterDomain { .. })));
    }

    #[test]
    fn test_truth_requires_both() {
        let cfg = FitConfig { true_alpha: Some(0.1), ..FitConfig::default() };
        assert!(cfg.truth().is_none());
        let cfg = FitConfig { true_beta: Some(2.0), ..cfg };
        assert_eq!(cfg.truth(), Some(Parameters::new(0.1, 2.0)));
    }
}
