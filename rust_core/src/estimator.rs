//! One interface over every way of turning a trial sequence into a
//! parameter estimate: full posterior sampling, or a pre-trained
//! amortized regressor ([`crate::amortized::AmortizedEstimator`]).

use crate::config::FitConfig;
use crate::diagnostics::PosteriorSummary;
use crate::error::{Error, Result};
use crate::model::{ALPHA, BETA};
use crate::sampler::fit;
use crate::trials::{Parameters, TrialSequence};

/// Point estimate plus a standard deviation per parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterEstimate {
    pub alpha: f64,
    pub beta: f64,
    pub alpha_sd: f64,
    pub beta_sd: f64,
}

impl ParameterEstimate {
    pub fn parameters(&self) -> Parameters {
        Parameters::new(self.alpha, self.beta)
    }

    /// Posterior mean and standard deviation from a summary.
    pub fn from_summary(summary: &PosteriorSummary) -> Result<Self> {
        let (Some(alpha), Some(beta)) = (summary.params.get(ALPHA), summary.params.get(BETA)) else {
            return Err(Error::NumericalInstability {
                context: "summary has no alpha/beta draws".to_string(),
            });
        };
        Ok(Self {
            alpha: alpha.mean,
            beta: beta.mean,
            alpha_sd: alpha.std,
            beta_sd: beta.std,
        })
    }
}

pub trait ParameterEstimator {
    fn estimate(&self, trials: &TrialSequence) -> Result<ParameterEstimate>;
}

/// Estimates by running NUTS on the Rescorla-Wagner posterior.
#[derive(Debug, Clone)]
pub struct McmcEstimator {
    config: FitConfig,
}

impl McmcEstimator {
    pub fn new(config: FitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }
}

impl ParameterEstimator for McmcEstimator {
    fn estimate(&self, trials: &TrialSequence) -> Result<ParameterEstimate> {
        let result = fit(&self.config, trials.clone())?;
        ParameterEstimate::from_summary(&result.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedStream;
    use crate::simulate::simulate;

    #[test]
    fn test_mcmc_estimator_brackets_truth() {
        let config = FitConfig {
            trial_count: 300,
            warmup_count: 200,
            sample_count: 300,
            chain_count: 2,
            v_init: 4.0,
            ..FitConfig::default()
        };
        let truth = Parameters::new(0.2, 1.5);
        let sim = simulate(truth, 5.0, 300, 0.1, 4.0, SeedStream::new(21)).unwrap();
        let est = McmcEstimator::new(config).unwrap().estimate(&sim.trials).unwrap();
        assert!((est.alpha - truth.alpha).abs() < 5.0 * est.alpha_sd + 0.02);
        assert!((est.beta - truth.beta).abs() < 5.0 * est.beta_sd + 0.02);
        assert!(est.alpha_sd > 0.0 && est.beta_sd > 0.0);
    }

    #[test]
    fn test_mcmc_estimator_rejects_empty_sequence() {
        let est = McmcEstimator::new(FitConfig::default()).unwrap();
        assert_eq!(est.estimate(&TrialSequence::empty()), Err(Error::EmptyTrials));
    }

    #[test]
    fn test_invalid_config_fails_at_construction() {
        let config = FitConfig {
            chain_count: 0,
            ..FitConfig::default()
        };
        assert!(McmcEstimator::new(config).is_err());
    }
}
