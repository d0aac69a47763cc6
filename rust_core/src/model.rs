//! Probabilistic model: priors plus an observation likelihood over a
//! Rescorla-Wagner prediction sequence, compiled into a [`Graph`].
//!
//! Two graphs are built from the same description. The sampler graph places
//! every parameter behind a differentiable transform to the real line and
//! adds the log-Jacobian of that transform. The constrained graph evaluates
//! `log_joint_density(alpha, beta | stimuli, rewards)` directly on the
//! parameter scale.

use crate::autodiff::grad_logp;
use crate::config::{FitConfig, LikelihoodKind, ParamPrior, PriorFamily, SigmaSpec};
use crate::distributions::{clip_unit_interval, BetaDist, Bounded, HalfNormal, Normal};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::trials::TrialSequence;
use tracing::{debug, warn};

/// Position of alpha in parameter vectors.
pub const ALPHA: usize = 0;
/// Position of beta in parameter vectors.
pub const BETA: usize = 1;
/// Position of sigma when it is sampled.
pub const SIGMA: usize = 2;

/// A differentiable log density on an unconstrained space.
///
/// Implementations are shared read-only between chains, hence `Sync`.
pub trait LogDensity: Send + Sync {
    fn dim(&self) -> usize;

    fn param_names(&self) -> Vec<String>;

    /// Log density at `q`, writing its gradient into `grad`.
    fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64;

    /// Map a sampler position to reported parameter values.
    fn constrain(&self, q: &[f64]) -> Vec<f64> {
        q.to_vec()
    }
}

/// Rescorla-Wagner model over one trial sequence.
#[derive(Debug, Clone)]
pub struct RwModel {
    unconstrained: Graph,
    constrained: Graph,
    trials: TrialSequence,
    likelihood: LikelihoodKind,
    v_init: f64,
    clipped: usize,
}

impl RwModel {
    /// Build the model. Configuration errors surface here, before any sampling.
    pub fn new(config: &FitConfig, trials: TrialSequence) -> Result<Self> {
        config.validate()?;
        if trials.is_empty() {
            return Err(Error::EmptyTrials);
        }

        let rewards = trials.rewards();
        let (obs, clipped) = match config.likelihood {
            LikelihoodKind::Gaussian => (rewards, 0),
            LikelihoodKind::Beta { epsilon } => {
                let (obs, clipped) = clip_unit_interval(&rewards, epsilon);
                if clipped > 0 {
                    warn!(
                        clipped,
                        total = obs.len(),
                        epsilon,
                        "clipped rewards into (epsilon, 1 - epsilon) for the beta likelihood"
                    );
                }
                (obs, clipped)
            }
        };

        let unconstrained = build_graph(config, &trials, &obs, Space::Unconstrained);
        let constrained = build_graph(config, &trials, &obs, Space::Constrained);
        debug!(
            params = ?unconstrained.param_names,
            nodes = unconstrained.nodes.len(),
            trials = trials.len(),
            "compiled model graph"
        );

        Ok(Self {
            unconstrained,
            constrained,
            trials,
            likelihood: config.likelihood,
            v_init: config.v_init,
            clipped,
        })
    }

    pub fn trials(&self) -> &TrialSequence {
        &self.trials
    }

    pub fn likelihood(&self) -> LikelihoodKind {
        self.likelihood
    }

    pub fn v_init(&self) -> f64 {
        self.v_init
    }

    /// Number of observations moved into `(epsilon, 1 - epsilon)` by the beta likelihood.
    pub fn clipped_count(&self) -> usize {
        self.clipped
    }

    /// Log joint density on the parameter scale and its gradient.
    ///
    /// `theta` is `[alpha, beta]`, plus `sigma` when sigma is sampled.
    /// Returns `-inf` outside the prior support.
    pub fn log_joint_density(&self, theta: &[f64]) -> (f64, Vec<f64>) {
        grad_logp(&self.constrained, theta)
    }

    /// Unconstrained sampler position for parameter values.
    pub fn unconstrain(&self, theta: &[f64]) -> Vec<f64> {
        self.unconstrained
            .param_transforms
            .iter()
            .zip(theta)
            .map(|(t, &x)| t.inverse(x))
            .collect()
    }
}

impl LogDensity for RwModel {
    fn dim(&self) -> usize {
        self.unconstrained.param_count
    }

    fn param_names(&self) -> Vec<String> {
        self.unconstrained.param_names.clone()
    }

    fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64 {
        let (logp, g) = grad_logp(&self.unconstrained, q);
        grad.copy_from_slice(&g);
        logp
    }

    fn constrain(&self, q: &[f64]) -> Vec<f64> {
        self.unconstrained.constrain(q)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    Unconstrained,
    Constrained,
}

fn build_graph(config: &FitConfig, trials: &TrialSequence, obs: &[f64], space: Space) -> Graph {
    let mut graph = Graph::new();
    let alpha = bounded_param(&mut graph, "alpha", &config.prior_spec.alpha, space);
    let beta = bounded_param(&mut graph, "beta", &config.beta_prior(), space);

    match config.likelihood {
        LikelihoodKind::Gaussian => {
            let sigma = match config.prior_spec.sigma {
                SigmaSpec::Fixed => graph.add_constant(config.observation_sigma),
                SigmaSpec::HalfNormal { scale } => match space {
                    Space::Unconstrained => HalfNormal::prior(&mut graph, "sigma", scale),
                    Space::Constrained => {
                        let s = graph.add_param("sigma");
                        graph.half_normal_logp(s, scale);
                        s
                    }
                },
            };
            let tidx = graph.add_trials(trials.clone());
            let mu = graph.rescorla_wagner(alpha, beta, tidx, config.v_init);
            Normal::observed(&mut graph, mu, sigma, obs.to_vec());
        }
        LikelihoodKind::Beta { .. } => {
            BetaDist::observed(&mut graph, alpha, beta, obs.to_vec());
        }
    }
    graph
}

fn bounded_param(graph: &mut Graph, name: &str, prior: &ParamPrior, space: Space) -> NodeId {
    match space {
        Space::Unconstrained => Bounded::prior(graph, name, prior),
        Space::Constrained => {
            let x = graph.add_param(name);
            let range = prior.upper - prior.lower;
            match prior.family {
                PriorFamily::Uniform => {
                    graph.uniform_logp(x, prior.lower, prior.upper);
                }
                PriorFamily::ScaledBeta { a, b } => {
                    let lower = graph.add_constant(prior.lower);
                    let inv_range = graph.add_constant(1.0 / range);
                    let shifted = graph.sub(x, lower);
                    let u = graph.mul(shifted, inv_range);
                    graph.beta_logp(u, a, b);
                    let norm = graph.add_constant(-range.ln());
                    graph.add_logp_term(norm);
                }
            }
            x
        }
    }
}
