use crate::chain::Chain;
use crate::config::FitConfig;
use crate::diagnostics::{summarize, PosteriorSummary, SummaryOptions};
use crate::error::{Error, Result};
use crate::model::{LogDensity, RwModel};
use crate::nuts::{self, NutsConfig};
use crate::progress::{spawn_progress_thread, ProgressState};
use crate::seed::SeedStream;
use crate::simulate::{simulate, Simulation};
use crate::trials::TrialSequence;
use rayon::prelude::*;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for the multi-chain sampler.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub num_chains: usize,
    pub num_draws: usize,
    pub num_warmup: usize,
    /// Initial step size. 0 selects one heuristically per chain.
    pub step_size: f64,
    pub max_tree_depth: usize,
    pub target_accept: f64,
    pub divergence_threshold: f64,
    pub max_divergence_fraction: f64,
    pub seed: u64,
    /// Number of threads. 0 means use Rayon's default (all cores).
    pub num_threads: usize,
    /// Period of the background progress reporter; `None` disables it.
    pub progress_interval: Option<Duration>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from_fit_config(&FitConfig::default())
    }
}

impl SamplerConfig {
    pub fn from_fit_config(config: &FitConfig) -> Self {
        Self {
            num_chains: config.chain_count,
            num_draws: config.sample_count,
            num_warmup: config.warmup_count,
            step_size: 0.0,
            max_tree_depth: config.max_tree_depth,
            target_accept: config.target_accept_prob,
            divergence_threshold: config.divergence_energy_threshold,
            max_divergence_fraction: config.max_divergence_fraction,
            seed: config.seed,
            num_threads: config.num_threads,
            progress_interval: None,
        }
    }

    fn nuts(&self) -> NutsConfig {
        NutsConfig {
            step_size: self.step_size,
            max_tree_depth: self.max_tree_depth,
            num_draws: self.num_draws,
            num_warmup: self.num_warmup,
            target_accept: self.target_accept,
            divergence_threshold: self.divergence_threshold,
            max_divergence_fraction: self.max_divergence_fraction,
        }
    }
}

/// Run parallel NUTS chains on `model`.
///
/// The model is shared read-only across all chains. Chain `k` draws from
/// stream `k + 1` of `config.seed`, so results do not depend on thread
/// scheduling.
pub fn sample<M: LogDensity + ?Sized>(model: &M, config: &SamplerConfig) -> Result<Vec<Chain>> {
    let progress = Arc::new(ProgressState::new(
        config.num_chains,
        config.num_draws,
        config.num_warmup,
    ));
    sample_with_progress(model, config, progress)
}

/// Like [`sample`], with caller-owned progress state. Calling
/// `progress.cancel()` from another thread stops every chain after its
/// current trajectory; the chains return the draws completed so far.
pub fn sample_with_progress<M: LogDensity + ?Sized>(
    model: &M,
    config: &SamplerConfig,
    progress: Arc<ProgressState>,
) -> Result<Vec<Chain>> {
    if config.num_chains == 0 {
        return Err(Error::config("num_chains", "must be positive"));
    }

    let nuts_config = config.nuts();
    let seeds = SeedStream::new(config.seed);
    let reporter = config
        .progress_interval
        .map(|interval| spawn_progress_thread(progress.clone(), interval));

    info!(
        chains = config.num_chains,
        warmup = config.num_warmup,
        draws = config.num_draws,
        dim = model.dim(),
        seed = config.seed,
        "sampling started"
    );

    let run = || -> Result<Vec<Chain>> {
        (0..config.num_chains)
            .into_par_iter()
            .map(|chain_idx| {
                let mut rng = seeds.chain(chain_idx);
                let chain = nuts::run_chain(
                    model,
                    &nuts_config,
                    chain_idx,
                    &mut rng,
                    None,
                    Some(progress.as_ref()),
                )?;
                info!(
                    chain = chain_idx,
                    step_size = chain.step_size,
                    acceptance = chain.acceptance_rate,
                    divergences = chain.divergences,
                    samples = chain.sample_count,
                    "chain finished"
                );
                Ok(chain)
            })
            .collect()
    };

    let result = if config.num_threads > 0 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => Err(Error::config("num_threads", e.to_string())),
        }
    } else {
        run()
    };

    progress.finish();
    if let Some(handle) = reporter {
        join_reporter(handle);
    }
    result
}

/// Wait for the progress reporter; returns `false` if it panicked.
fn join_reporter(handle: JoinHandle<()>) -> bool {
    match handle.join() {
        Ok(()) => true,
        Err(_) => {
            warn!("progress reporter thread panicked");
            false
        }
    }
}

/// Chains, their summary, and model bookkeeping from one fit.
#[derive(Debug, Clone)]
pub struct PosteriorFit {
    pub chains: Vec<Chain>,
    pub summary: PosteriorSummary,
    /// Observations clipped by the beta likelihood.
    pub clipped_count: usize,
}

/// Build the Rescorla-Wagner model for `trials` and sample its posterior.
///
/// Ground truth in `config` (both `true_alpha` and `true_beta`) adds
/// recovery metrics to the summary.
pub fn fit(config: &FitConfig, trials: TrialSequence) -> Result<PosteriorFit> {
    let model = RwModel::new(config, trials)?;
    let chains = sample(&model, &SamplerConfig::from_fit_config(config))?;
    let summary = summarize(&chains, &SummaryOptions::from_fit_config(config));
    Ok(PosteriorFit {
        chains,
        summary,
        clipped_count: model.clipped_count(),
    })
}

/// Simulation-validation run: simulate from the configured ground truth,
/// then fit the simulated sequence.
pub fn simulate_and_fit(config: &FitConfig) -> Result<(Simulation, PosteriorFit)> {
    config.validate()?;
    let truth = config
        .truth()
        .ok_or_else(|| Error::config("true_alpha", "simulation requires true_alpha and true_beta"))?;
    let sim = simulate(
        truth,
        config.beta_max,
        config.trial_count,
        config.observation_sigma,
        config.v_init,
        SeedStream::new(config.seed),
    )?;
    let fit = fit(config, sim.trials.clone())?;
    Ok((sim, fit))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Normal1 {
        mu: f64,
    }

    impl LogDensity for Normal1 {
        fn dim(&self) -> usize {
            1
        }
        fn param_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }
        fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            grad[0] = -(q[0] - self.mu);
            -0.5 * (q[0] - self.mu).powi(2)
        }
    }

    fn small() -> SamplerConfig {
        SamplerConfig {
            num_chains: 3,
            num_draws: 100,
            num_warmup: 100,
            seed: 11,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn test_chains_are_reproducible_and_distinct() {
        let target = Normal1 { mu: 2.0 };
        let a = sample(&target, &small()).unwrap();
        let b = sample(&target, &small()).unwrap();
        assert_eq!(a.len(), 3);
        for (ca, cb) in a.iter().zip(&b) {
            assert_eq!(ca.samples, cb.samples);
        }
        assert_ne!(a[0].samples, a[1].samples);
        assert_eq!(a[2].chain_id, 2);
    }

    #[test]
    fn test_dedicated_pool_matches_global_pool() {
        let target = Normal1 { mu: -1.0 };
        let global = sample(&target, &small()).unwrap();
        let pooled = sample(
            &target,
            &SamplerConfig {
                num_threads: 1,
                ..small()
            },
        )
        .unwrap();
        for (g, p) in global.iter().zip(&pooled) {
            assert_eq!(g.samples, p.samples);
        }
    }

    #[test]
    fn test_progress_counts_every_iteration() {
        let target = Normal1 { mu: 0.0 };
        let cfg = SamplerConfig {
            progress_interval: Some(Duration::from_millis(5)),
            ..small()
        };
        let progress = Arc::new(ProgressState::new(3, 100, 100));
        sample_with_progress(&target, &cfg, progress.clone()).unwrap();
        assert_eq!(progress.completed(), 600);
    }

    #[test]
    fn test_simulate_and_fit_requires_truth() {
        let err = simulate_and_fit(&FitConfig::default());
        assert!(matches!(err, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_reporter_panic_is_reported() {
        assert!(join_reporter(std::thread::spawn(|| {})));
        let handle = std::thread::spawn(|| {
            panic!("reporter failed");
        });
        assert!(!join_reporter(handle));
    }
}
