//! No-U-Turn Sampler (NUTS), after Hoffman & Gelman (2014), with multinomial
//! sampling (Betancourt 2017).
//!
//! This follows the same algorithm used by PyMC and Stan:
//!   - Iterative tree doubling (extend trajectory forward or backward)
//!   - U-turn criterion on every merged subtree and on the full trajectory
//!   - Multinomial candidate selection weighted by exp(-H) inside subtrees,
//!     biased progressive sampling between the old tree and a new subtree
//!   - Divergence detection via energy error threshold
//!   - Max tree depth cap
//!
//! The target is any [`LogDensity`] on an unconstrained space; constrained
//! models supply the log-Jacobian of their transform inside the density.

use crate::chain::{Chain, PosteriorSample};
use crate::error::{Error, Result};
use crate::model::LogDensity;
use crate::progress::ProgressState;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, warn};

/// Attempts at finding a finite initial point before giving up.
const MAX_INIT_ATTEMPTS: usize = 100;
/// Half-width of the uniform initialisation box in unconstrained space.
const INIT_RADIUS: f64 = 2.0;
/// Finite candidates drawn per start; the one with the highest density wins.
const INIT_CANDIDATES: usize = 16;
/// Fresh starts tried when the step-size heuristic bottoms out.
const MAX_RESTARTS: usize = 5;
const MIN_STEP_SIZE: f64 = 1e-10;
const MAX_STEP_SIZE: f64 = 1e3;

#[derive(Debug, Clone)]
pub struct NutsConfig {
    /// Initial step size; 0 selects one heuristically.
    pub step_size: f64,
    pub max_tree_depth: usize,
    pub num_draws: usize,
    pub num_warmup: usize,
    pub target_accept: f64,
    /// Energy error above which a transition is divergent.
    pub divergence_threshold: f64,
    /// Divergent fraction above which the chain is flagged unreliable.
    pub max_divergence_fraction: f64,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            step_size: 0.0,
            max_tree_depth: 10,
            num_draws: 1000,
            num_warmup: 500,
            target_accept: 0.8,
            divergence_threshold: 1000.0,
            max_divergence_fraction: 0.05,
        }
    }
}

/// A point on the Hamiltonian trajectory: (position, momentum, gradient, log-probability).
#[derive(Clone)]
struct PhasePoint {
    q: Vec<f64>,
    p: Vec<f64>,
    grad: Vec<f64>,
    logp: f64,
}

impl PhasePoint {
    fn energy(&self, inv_mass: &[f64]) -> f64 {
        let ke: f64 = self
            .p
            .iter()
            .zip(inv_mass.iter())
            .map(|(&pi, &im)| 0.5 * pi * pi * im)
            .sum();
        -self.logp + ke
    }
}

/// Result of building one subtree during the doubling process.
struct TreeResult {
    /// Leftmost point of the subtree.
    left: PhasePoint,
    /// Rightmost point of the subtree.
    right: PhasePoint,
    /// The candidate sample (multinomial-selected from valid leaves).
    proposal: PhasePoint,
    /// Log of the sum of weights exp(H0 - H) over the leaves.
    log_sum_weight: f64,
    n_leapfrog: usize,
    /// Sum over leaves of min(1, exp(H0 - H)).
    sum_accept: f64,
    /// Whether a U-turn was detected inside this subtree.
    turning: bool,
    /// Whether a divergence was detected.
    diverging: bool,
    /// Whether the divergence came from a non-finite density.
    non_finite: bool,
}

/// Step-size and mass-matrix state carried through warmup.
struct Adaptation {
    target: f64,
    mu: f64,
    log_eps_bar: f64,
    h_bar: f64,
    count: u64,
}

impl Adaptation {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(step_size: f64, target: f64) -> Self {
        Self {
            target,
            mu: (10.0 * step_size).ln(),
            log_eps_bar: step_size.ln(),
            h_bar: 0.0,
            count: 0,
        }
    }

    /// Dual-averaging update; returns the next step size.
    fn update(&mut self, accept_stat: f64) -> f64 {
        self.count += 1;
        let m = self.count as f64;
        let w = 1.0 / (m + Self::T0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target - accept_stat);
        let log_eps = self.mu - (m.sqrt() / Self::GAMMA) * self.h_bar;
        let m_pow = m.powf(-Self::KAPPA);
        self.log_eps_bar = m_pow * log_eps + (1.0 - m_pow) * self.log_eps_bar;
        log_eps.exp()
    }

    fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

/// Running mean/variance (Welford) for the diagonal mass matrix.
struct Welford {
    n: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl Welford {
    fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn push(&mut self, x: &[f64]) {
        self.n += 1;
        let n = self.n as f64;
        for i in 0..x.len() {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            self.m2[i] += delta * (x[i] - self.mean[i]);
        }
    }

    /// Sample variance shrunk towards 1e-3 as in Stan.
    fn regularized_variance(&self) -> Vec<f64> {
        let n = self.n as f64;
        self.m2
            .iter()
            .map(|&m2| {
                let var = m2 / (n - 1.0);
                (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0))
            })
            .collect()
    }
}

/// Run a single NUTS chain with diagonal mass matrix adaptation.
///
/// Warmup runs full NUTS transitions in three windows:
///   Phase 1 (15%): step-size adaptation, identity mass matrix
///   Phase 2 (75%): collect positions → diagonal mass matrix
///   Phase 3 (10%): final step-size adaptation with adapted mass matrix
///
/// The chain polls `progress` for cancellation after every completed
/// trajectory and returns the draws collected so far if asked to stop.
pub fn run_chain<M: LogDensity + ?Sized>(
    model: &M,
    config: &NutsConfig,
    chain_id: usize,
    rng: &mut ChaCha8Rng,
    init: Option<Vec<f64>>,
    progress: Option<&ProgressState>,
) -> Result<Chain> {
    let dim = model.dim();
    let total_iters = config.num_warmup + config.num_draws;

    let supplied_init = init.is_some();
    let mut current = initial_point(model, init, rng)?;
    let mut samples = Vec::with_capacity(config.num_draws);
    let mut divergences = 0usize;
    let mut warmup_divergences = 0usize;
    let mut non_finite = 0usize;
    let mut sum_accept_prob = 0.0f64;
    let mut cancelled = false;
    let mut warmup_done = 0usize;

    let mut inv_mass = vec![1.0f64; dim];

    let phase1_end = config.num_warmup * 15 / 100;
    let phase2_end = config.num_warmup * 90 / 100;
    let mut welford = Welford::new(dim);

    let mut step_size = if config.step_size > 0.0 {
        config.step_size
    } else {
        let mut eps = find_initial_step_size(model, &current, &inv_mass, rng);
        let mut restarts = 0;
        // A collapsed step means the start sits on a cliff the chain cannot leave.
        while eps <= MIN_STEP_SIZE && !supplied_init {
            if restarts == MAX_RESTARTS {
                return Err(Error::NumericalInstability {
                    context: format!(
                        "step size collapsed at every initial point after {MAX_RESTARTS} restarts"
                    ),
                });
            }
            restarts += 1;
            warn!(
                chain = chain_id,
                logp = current.logp,
                restarts,
                "step size collapsed at initial point, restarting"
            );
            current = initial_point(model, None, rng)?;
            eps = find_initial_step_size(model, &current, &inv_mass, rng);
        }
        eps
    };
    let mut adapt = Adaptation::new(step_size, config.target_accept);

    debug!(chain = chain_id, step_size, dim, "chain initialised");

    for iter in 0..total_iters {
        if progress.is_some_and(|p| p.is_cancelled()) {
            cancelled = true;
            break;
        }
        let is_warmup = iter < config.num_warmup;

        for i in 0..dim {
            let z: f64 = StandardNormal.sample(rng);
            current.p[i] = z / inv_mass[i].sqrt();
        }

        let (proposal, stats) = build_tree_iterative(
            model,
            &current,
            step_size,
            &inv_mass,
            config.max_tree_depth,
            config.divergence_threshold,
            rng,
        );

        // The multinomial selection is the acceptance step: the proposal is
        // the current point unless another trajectory state was selected.
        current.q = proposal.q;
        current.grad = proposal.grad;
        current.logp = proposal.logp;

        if stats.non_finite {
            non_finite += 1;
        }
        if let Some(p) = progress {
            p.increment();
            if stats.diverging {
                p.add_divergence();
            }
        }

        if is_warmup {
            warmup_done += 1;
            if stats.diverging {
                warmup_divergences += 1;
            }
            step_size = adapt.update(stats.accept_stat);

            if iter >= phase1_end && iter < phase2_end {
                welford.push(&current.q);
            }

            if iter + 1 == phase2_end && welford.n > 10 {
                inv_mass = welford.regularized_variance();
                step_size = find_initial_step_size(model, &current, &inv_mass, rng);
                adapt = Adaptation::new(step_size, config.target_accept);
                debug!(chain = chain_id, ?inv_mass, step_size, "mass matrix adapted");
            }

            if iter + 1 == config.num_warmup {
                step_size = adapt.final_step_size();
                debug!(chain = chain_id, step_size, "warmup finished");
            }
            continue;
        }

        if stats.diverging {
            divergences += 1;
        }
        sum_accept_prob += stats.accept_stat;
        samples.push(PosteriorSample {
            values: model.constrain(&current.q),
            log_density: current.logp,
            divergent: stats.diverging,
            tree_depth: stats.depth,
            n_leapfrog: stats.n_leapfrog,
            accept_stat: stats.accept_stat,
        });
    }

    let sample_count = samples.len();
    let acceptance_rate = if sample_count > 0 {
        sum_accept_prob / sample_count as f64
    } else {
        0.0
    };
    let divergence_rate = if sample_count > 0 {
        divergences as f64 / sample_count as f64
    } else {
        0.0
    };
    let unreliable = divergence_rate > config.max_divergence_fraction;
    if unreliable {
        warn!(
            chain = chain_id,
            divergences,
            samples = sample_count,
            rate = divergence_rate,
            threshold = config.max_divergence_fraction,
            "chain flagged unreliable"
        );
    }
    if cancelled {
        warn!(chain = chain_id, samples = sample_count, "chain cancelled");
    }

    Ok(Chain {
        chain_id,
        param_names: model.param_names(),
        samples,
        warmup_count: warmup_done,
        sample_count,
        step_size,
        inv_mass_diag: inv_mass,
        acceptance_rate,
        divergences,
        warmup_divergences,
        non_finite,
        unreliable,
        cancelled,
    })
}

/// Starting point: the caller's, or the highest-density of several uniform
/// draws in (-2, 2)^d whose density and gradient are finite.
fn initial_point<M: LogDensity + ?Sized>(
    model: &M,
    init: Option<Vec<f64>>,
    rng: &mut ChaCha8Rng,
) -> Result<PhasePoint> {
    let dim = model.dim();
    let mut grad = vec![0.0; dim];

    if let Some(q) = init {
        if q.len() != dim {
            return Err(Error::config(
                "init",
                format!("expected {dim} coordinates, got {}", q.len()),
            ));
        }
        let logp = model.log_density_and_grad(&q, &mut grad);
        if !(logp.is_finite() && grad.iter().all(|g| g.is_finite())) {
            return Err(Error::NumericalInstability {
                context: "log density is not finite at the supplied initial point".to_string(),
            });
        }
        return Ok(PhasePoint {
            q,
            p: vec![0.0; dim],
            grad,
            logp,
        });
    }

    let mut best: Option<PhasePoint> = None;
    let mut candidates = 0usize;
    for _ in 0..MAX_INIT_ATTEMPTS {
        let q: Vec<f64> = (0..dim)
            .map(|_| rng.gen_range(-INIT_RADIUS..INIT_RADIUS))
            .collect();
        let logp = model.log_density_and_grad(&q, &mut grad);
        if !(logp.is_finite() && grad.iter().all(|g| g.is_finite())) {
            continue;
        }
        if best.as_ref().map_or(true, |b| logp > b.logp) {
            best = Some(PhasePoint {
                q,
                p: vec![0.0; dim],
                grad: grad.clone(),
                logp,
            });
        }
        candidates += 1;
        if candidates == INIT_CANDIDATES {
            break;
        }
    }
    best.ok_or_else(|| Error::NumericalInstability {
        context: format!("no finite initial point after {MAX_INIT_ATTEMPTS} attempts"),
    })
}

struct TreeStats {
    diverging: bool,
    non_finite: bool,
    accept_stat: f64,
    depth: usize,
    n_leapfrog: usize,
}

/// Build the NUTS tree iteratively by doubling depth.
///
/// At each depth j, the tree has 2^j leaves. We randomly choose to extend
/// the trajectory forward (+ε) or backward (-ε). A divergent or turning
/// subtree stops the doubling and is never used as a proposal; otherwise
/// the new subtree's candidate replaces the current one with probability
/// min(1, w_subtree / w_tree).
fn build_tree_iterative<M: LogDensity + ?Sized>(
    model: &M,
    initial: &PhasePoint,
    eps: f64,
    inv_mass: &[f64],
    max_depth: usize,
    threshold: f64,
    rng: &mut ChaCha8Rng,
) -> (PhasePoint, TreeStats) {
    let h0 = initial.energy(inv_mass);
    let mut left = initial.clone();
    let mut right = initial.clone();
    let mut proposal = initial.clone();
    // log(exp(H0 - H(initial))) = 0
    let mut log_sum_weight = 0.0f64;
    let mut depth = 0;
    let mut n_leapfrog = 0usize;
    let mut sum_accept = 0.0f64;
    let mut diverging = false;
    let mut non_finite = false;

    while depth < max_depth {
        let forward = rng.gen::<bool>();

        let subtree = if forward {
            build_subtree(model, &right, eps, inv_mass, h0, depth, threshold, rng)
        } else {
            build_subtree(model, &left, -eps, inv_mass, h0, depth, threshold, rng)
        };

        depth += 1;
        n_leapfrog += subtree.n_leapfrog;
        sum_accept += subtree.sum_accept;

        if subtree.diverging {
            diverging = true;
            non_finite = subtree.non_finite;
            break;
        }
        if subtree.turning {
            break;
        }

        if rng.gen::<f64>().ln() < subtree.log_sum_weight - log_sum_weight {
            proposal = subtree.proposal;
        }
        log_sum_weight = log_sum_exp(log_sum_weight, subtree.log_sum_weight);

        if forward {
            right = subtree.right;
        } else {
            left = subtree.left;
        }

        if check_uturn(&left, &right, inv_mass) {
            break;
        }
    }

    let accept_stat = if n_leapfrog > 0 {
        sum_accept / n_leapfrog as f64
    } else {
        0.0
    };

    (
        proposal,
        TreeStats {
            diverging,
            non_finite,
            accept_stat,
            depth,
            n_leapfrog,
        },
    )
}

/// Recursively build a balanced binary subtree of given depth.
///
/// depth=0: take a single leapfrog step.
/// depth=j: build two subtrees of depth j-1 and combine.
#[allow(clippy::too_many_arguments)]
fn build_subtree<M: LogDensity + ?Sized>(
    model: &M,
    point: &PhasePoint,
    eps: f64,
    inv_mass: &[f64],
    h0: f64,
    depth: usize,
    threshold: f64,
    rng: &mut ChaCha8Rng,
) -> TreeResult {
    if depth == 0 {
        let next = leapfrog(model, point, eps, inv_mass);
        let h_new = next.energy(inv_mass);
        let delta_h = h_new - h0;
        let non_finite = !h_new.is_finite();
        let diverging = non_finite || delta_h > threshold;
        let log_weight = if diverging { f64::NEG_INFINITY } else { -delta_h };
        let accept = if non_finite { 0.0 } else { (-delta_h).min(0.0).exp() };

        return TreeResult {
            left: next.clone(),
            right: next.clone(),
            proposal: next,
            log_sum_weight: log_weight,
            n_leapfrog: 1,
            sum_accept: accept,
            turning: false,
            diverging,
            non_finite,
        };
    }

    let inner = build_subtree(model, point, eps, inv_mass, h0, depth - 1, threshold, rng);
    if inner.diverging || inner.turning {
        return inner;
    }

    // Build second half from the far endpoint
    let start_point = if eps > 0.0 { &inner.right } else { &inner.left };
    let outer = build_subtree(model, start_point, eps, inv_mass, h0, depth - 1, threshold, rng);

    let n_leapfrog = inner.n_leapfrog + outer.n_leapfrog;
    let sum_accept = inner.sum_accept + outer.sum_accept;

    if outer.diverging || outer.turning {
        return TreeResult {
            left: inner.left,
            right: inner.right,
            proposal: inner.proposal,
            log_sum_weight: inner.log_sum_weight,
            n_leapfrog,
            sum_accept,
            turning: outer.turning,
            diverging: outer.diverging,
            non_finite: outer.non_finite,
        };
    }

    // Combine proposals via multinomial weighting
    let log_sum = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let accept_outer = (outer.log_sum_weight - log_sum).exp();
    let proposal = if rng.gen::<f64>() < accept_outer {
        outer.proposal
    } else {
        inner.proposal
    };

    // Inner is closer to the start, outer is farther
    let (left, right) = if eps > 0.0 {
        (inner.left, outer.right)
    } else {
        (outer.left, inner.right)
    };

    let turning = check_uturn(&left, &right, inv_mass);

    TreeResult {
        left,
        right,
        proposal,
        log_sum_weight: log_sum,
        n_leapfrog,
        sum_accept,
        turning,
        diverging: false,
        non_finite: false,
    }
}

/// Single leapfrog step (half-step momentum, full-step position, half-step momentum).
fn leapfrog<M: LogDensity + ?Sized>(
    model: &M,
    point: &PhasePoint,
    eps: f64,
    inv_mass: &[f64],
) -> PhasePoint {
    let dim = point.q.len();
    let mut p_new = vec![0.0; dim];
    let mut q_new = vec![0.0; dim];
    let mut grad_new = vec![0.0; dim];

    for i in 0..dim {
        p_new[i] = point.p[i] + 0.5 * eps * point.grad[i];
    }
    for i in 0..dim {
        q_new[i] = point.q[i] + eps * inv_mass[i] * p_new[i];
    }
    let logp_new = model.log_density_and_grad(&q_new, &mut grad_new);
    for i in 0..dim {
        p_new[i] += 0.5 * eps * grad_new[i];
    }

    PhasePoint {
        q: q_new,
        p: p_new,
        grad: grad_new,
        logp: logp_new,
    }
}

/// U-turn check: the trajectory is turning if the momentum at either end
/// would decrease the distance between the endpoints.
///
///   (q_right - q_left) · (M⁻¹ p_left) < 0  OR
///   (q_right - q_left) · (M⁻¹ p_right) < 0
fn check_uturn(left: &PhasePoint, right: &PhasePoint, inv_mass: &[f64]) -> bool {
    let mut dot_left = 0.0f64;
    let mut dot_right = 0.0f64;
    for i in 0..left.q.len() {
        let dq = right.q[i] - left.q[i];
        dot_left += dq * (inv_mass[i] * left.p[i]);
        dot_right += dq * (inv_mass[i] * right.p[i]);
    }
    dot_left < 0.0 || dot_right < 0.0
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Heuristic initial step size: double or halve until a single leapfrog
/// step's acceptance probability crosses 0.5.
fn find_initial_step_size<M: LogDensity + ?Sized>(
    model: &M,
    point: &PhasePoint,
    inv_mass: &[f64],
    rng: &mut ChaCha8Rng,
) -> f64 {
    let dim = point.q.len();
    let mut start = point.clone();
    for i in 0..dim {
        let z: f64 = StandardNormal.sample(rng);
        start.p[i] = z / inv_mass[i].sqrt();
    }
    let h0 = start.energy(inv_mass);
    let log_half = 0.5f64.ln();

    let mut eps = 1.0;
    let first = h0 - leapfrog(model, &start, eps, inv_mass).energy(inv_mass);
    let direction = if first.is_finite() && first > log_half {
        1.0
    } else {
        -1.0
    };

    for _ in 0..100 {
        let lr = h0 - leapfrog(model, &start, eps, inv_mass).energy(inv_mass);
        if direction > 0.0 && !(lr.is_finite() && lr > log_half) {
            break;
        }
        if direction < 0.0 && lr.is_finite() && lr > log_half {
            break;
        }
        eps *= 2.0_f64.powf(direction);
    }

    eps.clamp(MIN_STEP_SIZE, MAX_STEP_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedStream;

    /// Independent Gaussians with the given means and standard deviations.
    struct Gaussian {
        mu: Vec<f64>,
        sd: Vec<f64>,
    }

    impl LogDensity for Gaussian {
        fn dim(&self) -> usize {
            self.mu.len()
        }

        fn param_names(&self) -> Vec<String> {
            (0..self.mu.len()).map(|i| format!("x{i}")).collect()
        }

        fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            let mut lp = 0.0;
            for i in 0..q.len() {
                let z = (q[i] - self.mu[i]) / self.sd[i];
                lp -= 0.5 * z * z;
                grad[i] = -z / self.sd[i];
            }
            lp
        }
    }

    #[test]
    fn test_leapfrog_is_reversible() {
        let target = Gaussian {
            mu: vec![0.5, -1.0],
            sd: vec![1.0, 2.0],
        };
        let q = vec![0.2, 0.3];
        let mut grad = vec![0.0; 2];
        let logp = target.log_density_and_grad(&q, &mut grad);
        let start = PhasePoint {
            q: q.clone(),
            p: vec![0.7, -0.4],
            grad,
            logp,
        };
        let inv_mass = [1.0, 4.0];
        let fwd = leapfrog(&target, &start, 0.1, &inv_mass);
        let back = leapfrog(&target, &fwd, -0.1, &inv_mass);
        for i in 0..2 {
            assert!((back.q[i] - q[i]).abs() < 1e-12);
            assert!((back.p[i] - start.p[i]).abs() < 1e-12);
        }
        // Energy is nearly conserved for a small step
        assert!((fwd.energy(&inv_mass) - start.energy(&inv_mass)).abs() < 1e-2);
    }

    #[test]
    fn test_log_sum_exp() {
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert!((log_sum_exp(0.0, 0.0) - 2.0f64.ln()).abs() < 1e-15);
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, -1.5), -1.5);
    }

    #[test]
    fn test_welford_matches_two_pass() {
        let xs = [[1.0, 2.0], [2.0, 0.0], [4.0, 1.0], [0.5, 3.0]];
        let mut w = Welford::new(2);
        for x in &xs {
            w.push(x);
        }
        let mean0 = xs.iter().map(|x| x[0]).sum::<f64>() / 4.0;
        let var0 = xs.iter().map(|x| (x[0] - mean0).powi(2)).sum::<f64>() / 3.0;
        let expected = (4.0 / 9.0) * var0 + 1e-3 * (5.0 / 9.0);
        assert!((w.regularized_variance()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_dual_averaging_shrinks_step_on_low_acceptance() {
        let mut a = Adaptation::new(1.0, 0.8);
        let mut eps = 1.0;
        for _ in 0..50 {
            eps = a.update(0.1);
        }
        assert!(eps < 1.0);
        assert!(a.final_step_size() < 1.0);
    }

    #[test]
    fn test_standard_normal_moments() {
        let target = Gaussian {
            mu: vec![1.0, -2.0],
            sd: vec![0.5, 3.0],
        };
        let config = NutsConfig {
            num_warmup: 400,
            num_draws: 2000,
            ..NutsConfig::default()
        };
        let mut rng = SeedStream::new(9).chain(0);
        let chain = run_chain(&target, &config, 0, &mut rng, None, None).unwrap();
        assert_eq!(chain.sample_count, 2000);
        assert_eq!(chain.divergences, 0);
        assert!(!chain.unreliable);

        for i in 0..2 {
            let xs = chain.trace(i);
            let n = xs.len() as f64;
            let mean = xs.iter().sum::<f64>() / n;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
            let sd = target.sd[i];
            assert!((mean - target.mu[i]).abs() < 0.15 * sd, "mean {i}: {mean}");
            assert!((var / (sd * sd) - 1.0).abs() < 0.2, "var {i}: {var}");
        }
        // Mass matrix picks up the scale difference
        assert!(chain.inv_mass_diag[1] > 10.0 * chain.inv_mass_diag[0]);
    }

    #[test]
    fn test_rejects_non_finite_init() {
        let target = Gaussian {
            mu: vec![0.0],
            sd: vec![1.0],
        };
        let mut rng = SeedStream::new(1).chain(0);
        let err = run_chain(
            &target,
            &NutsConfig::default(),
            0,
            &mut rng,
            Some(vec![f64::NAN]),
            None,
        );
        assert!(matches!(err, Err(Error::NumericalInstability { .. })));
    }

    /// Gaussian at -3 for q < 0; an enormous but finite cliff for q >= 0.
    struct Cliff;

    impl LogDensity for Cliff {
        fn dim(&self) -> usize {
            1
        }

        fn param_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            if q[0] < 0.0 {
                grad[0] = -(q[0] + 3.0);
                -0.5 * (q[0] + 3.0).powi(2)
            } else {
                grad[0] = -2e170 * q[0];
                -1e170 * (1.0 + q[0] * q[0])
            }
        }
    }

    /// The cliff everywhere: no start admits a usable step size.
    struct Wall;

    impl LogDensity for Wall {
        fn dim(&self) -> usize {
            1
        }

        fn param_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }

        fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64 {
            grad[0] = -2e170 * q[0];
            -1e170 * (1.0 + q[0] * q[0])
        }
    }

    #[test]
    fn test_initial_point_prefers_highest_density() {
        for seed in 0..20 {
            let mut rng = SeedStream::new(seed).chain(0);
            let point = initial_point(&Cliff, None, &mut rng).unwrap();
            assert!(point.q[0] < 0.0, "seed {seed}: start {}", point.q[0]);
        }
    }

    #[test]
    fn test_chains_never_start_on_cliff() {
        let config = NutsConfig {
            num_warmup: 200,
            num_draws: 300,
            ..NutsConfig::default()
        };
        for seed in 0..8 {
            let mut rng = SeedStream::new(seed).chain(0);
            let chain = run_chain(&Cliff, &config, 0, &mut rng, None, None).unwrap();
            assert!(chain.step_size > 1e-3, "seed {seed}: step {}", chain.step_size);
            let distinct = chain
                .samples
                .windows(2)
                .filter(|w| w[0].values != w[1].values)
                .count();
            assert!(distinct > 100, "seed {seed}: {distinct} moves");
            assert!(chain.samples.iter().all(|s| s.values[0] < 0.0));
        }
    }

    #[test]
    fn test_collapsed_step_size_exhausts_restarts() {
        let mut rng = SeedStream::new(3).chain(0);
        let err = run_chain(&Wall, &NutsConfig::default(), 0, &mut rng, None, None);
        assert!(matches!(err, Err(Error::NumericalInstability { .. })));
    }

    #[test]
    fn test_cancelled_during_warmup_reports_zero_warmup() {
        let target = Gaussian {
            mu: vec![0.0],
            sd: vec![1.0],
        };
        let progress = ProgressState::new(1, 100, 100);
        progress.cancel();
        let mut rng = SeedStream::new(4).chain(0);
        let chain = run_chain(
            &target,
            &NutsConfig::default(),
            0,
            &mut rng,
            None,
            Some(&progress),
        )
        .unwrap();
        assert!(chain.cancelled);
        assert_eq!(chain.warmup_count, 0);
        assert_eq!(chain.sample_count, 0);
    }
}
