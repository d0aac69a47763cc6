use crate::model::{ALPHA, BETA};
use crate::trials::Parameters;

/// One post-warmup draw.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSample {
    /// Parameter values on the constrained scale, in model order.
    pub values: Vec<f64>,
    /// Log density of the sampler position (unconstrained, Jacobian included).
    pub log_density: f64,
    pub divergent: bool,
    pub tree_depth: usize,
    pub n_leapfrog: usize,
    /// Mean Metropolis acceptance over the trajectory.
    pub accept_stat: f64,
}

impl PosteriorSample {
    /// `(alpha, beta)` for draws from the Rescorla-Wagner model.
    pub fn parameters(&self) -> Parameters {
        Parameters::new(self.values[ALPHA], self.values[BETA])
    }
}

/// Ordered draws from one sampler run plus the adaptation state it ended with.
///
/// Produced once by [`crate::nuts::run_chain`] and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Chain {
    pub chain_id: usize,
    pub param_names: Vec<String>,
    pub samples: Vec<PosteriorSample>,
    /// Warmup iterations actually run.
    pub warmup_count: usize,
    /// Draws actually completed; smaller than requested if the run was cancelled.
    pub sample_count: usize,
    pub step_size: f64,
    pub inv_mass_diag: Vec<f64>,
    pub acceptance_rate: f64,
    pub divergences: usize,
    pub warmup_divergences: usize,
    /// Trajectories that hit a non-finite log density.
    pub non_finite: usize,
    /// Divergent fraction exceeded the configured threshold.
    pub unreliable: bool,
    pub cancelled: bool,
}

impl Chain {
    /// Draws of parameter `idx`.
    pub fn trace(&self, idx: usize) -> Vec<f64> {
        self.samples.iter().map(|s| s.values[idx]).collect()
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }

    pub fn divergence_rate(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.divergences as f64 / self.samples.len() as f64
        }
    }

    pub fn mean_tree_depth(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.tree_depth as f64).sum::<f64>() / self.samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(values: Vec<f64>, divergent: bool) -> PosteriorSample {
        PosteriorSample {
            values,
            log_density: -1.0,
            divergent,
            tree_depth: 2,
            n_leapfrog: 3,
            accept_stat: 0.9,
        }
    }

    #[test]
    fn test_trace_and_rates() {
        let chain = Chain {
            chain_id: 0,
            param_names: vec!["alpha".into(), "beta".into()],
            samples: vec![
                sample(vec![0.1, 2.0], false),
                sample(vec![0.2, 1.0], true),
            ],
            warmup_count: 0,
            sample_count: 2,
            step_size: 0.1,
            inv_mass_diag: vec![1.0, 1.0],
            acceptance_rate: 0.9,
            divergences: 1,
            warmup_divergences: 0,
            non_finite: 0,
            unreliable: true,
            cancelled: false,
        };
        assert_eq!(chain.trace(1), vec![2.0, 1.0]);
        assert_eq!(chain.param_index("beta"), Some(1));
        assert_eq!(chain.divergence_rate(), 0.5);
        assert_eq!(chain.mean_tree_depth(), 2.0);
        assert_eq!(chain.samples[0].parameters(), Parameters::new(0.1, 2.0));
    }
}
