//! MCMC diagnostic computations: R-hat, ESS, MCSE, quantiles, plus
//! recovery metrics against known ground truth.
//!
//! All algorithms follow the definitions in:
//!   Vehtari et al. (2021) "Rank-normalization, folding, and localization:
//!   An improved R-hat for assessing convergence of MCMC"

use crate::chain::Chain;
use crate::config::FitConfig;
use crate::model::{ALPHA, BETA};
use crate::transition;
use crate::trials::{Parameters, TrialSequence};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use tracing::warn;

/// Split chains shorter than this carry too little information for ESS or R-hat.
const MIN_DRAWS: usize = 4;

/// Non-fatal conditions found while summarizing.
#[derive(Debug, Clone, PartialEq)]
pub enum Advisory {
    /// R-hat needs at least two chains.
    InsufficientChains { chains: usize },
    /// R-hat above threshold or bulk ESS below the minimum.
    ConvergenceFailure {
        parameter: String,
        r_hat: Option<f64>,
        ess_bulk: f64,
    },
    /// The chain's divergent fraction exceeded its threshold.
    UnreliableChain { chain_id: usize, divergence_rate: f64 },
    /// Chains had different lengths (e.g. after cancellation) and were cut
    /// to the shortest.
    TruncatedChains { shortest: usize, longest: usize },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::InsufficientChains { chains } => {
                write!(f, "R-hat unavailable with {chains} chain(s); run at least 2")
            }
            Advisory::ConvergenceFailure {
                parameter,
                r_hat,
                ess_bulk,
            } => match r_hat {
                Some(r) => write!(f, "{parameter} may not have converged (R-hat {r:.3}, ESS {ess_bulk:.0})"),
                None => write!(f, "{parameter} may not have converged (ESS {ess_bulk:.0})"),
            },
            Advisory::UnreliableChain {
                chain_id,
                divergence_rate,
            } => write!(
                f,
                "chain {chain_id} is unreliable ({:.1}% divergent)",
                100.0 * divergence_rate
            ),
            Advisory::TruncatedChains { shortest, longest } => {
                write!(f, "chains truncated from {longest} to {shortest} draws")
            }
        }
    }
}

/// Per-parameter diagnostic summary.
#[derive(Debug, Clone)]
pub struct ParamDiagnostics {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    /// Equal-tailed credible interval at `PosteriorSummary::credible_mass`.
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    /// `None` with fewer than two chains.
    pub r_hat: Option<f64>,
    pub mcse_mean: f64,
}

/// Error of the posterior mean against ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    pub truth: Parameters,
    pub abs_error_alpha: f64,
    pub abs_error_beta: f64,
    /// Root mean squared error across alpha and beta.
    pub rmse: f64,
}

/// Options for [`summarize`].
#[derive(Debug, Clone)]
pub struct SummaryOptions {
    pub credible_mass: f64,
    pub rhat_threshold: f64,
    pub min_ess: f64,
    pub truth: Option<Parameters>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self::from_fit_config(&FitConfig::default())
    }
}

impl SummaryOptions {
    pub fn from_fit_config(config: &FitConfig) -> Self {
        Self {
            credible_mass: config.credible_mass,
            rhat_threshold: config.rhat_threshold,
            min_ess: config.min_ess,
            truth: config.truth(),
        }
    }
}

/// Full diagnostic report for a sampling run.
#[derive(Debug, Clone)]
pub struct PosteriorSummary {
    pub params: Vec<ParamDiagnostics>,
    pub num_chains: usize,
    /// Draws per chain used for every statistic.
    pub num_draws: usize,
    pub credible_mass: f64,
    pub accept_rates: Vec<f64>,
    pub divergences: usize,
    pub advisories: Vec<Advisory>,
    pub recovery: Option<Recovery>,
}

impl PosteriorSummary {
    pub fn param(&self, name: &str) -> Option<&ParamDiagnostics> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Posterior means of alpha and beta.
    pub fn posterior_mean(&self) -> Option<Parameters> {
        let alpha = self.params.get(ALPHA)?;
        let beta = self.params.get(BETA)?;
        Some(Parameters::new(alpha.mean, beta.mean))
    }

    /// No convergence failure or unreliable chain was found.
    pub fn converged(&self) -> bool {
        !self.advisories.iter().any(|a| {
            matches!(
                a,
                Advisory::ConvergenceFailure { .. } | Advisory::UnreliableChain { .. }
            )
        })
    }

    /// Render the diagnostics as a formatted table string.
    pub fn to_table(&self) -> String {
        let lo_pct = 50.0 * (1.0 - self.credible_mass);
        let hi_pct = 100.0 - lo_pct;
        let mut lines = Vec::new();
        lines.push(format!(
            "{} chains × {} draws per chain",
            self.num_chains, self.num_draws
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>8} {:>8} {:>10} {:>10} {:>10} {:>10} {:>8} {:>10}",
            "Parameter",
            "mean",
            "std",
            format!("ci_{lo_pct:.0}%"),
            format!("ci_{hi_pct:.0}%"),
            "ess_bulk",
            "ess_tail",
            "r_hat",
            "mcse_mean"
        ));
        lines.push("─".repeat(96));

        for p in &self.params {
            let r_hat_s = match p.r_hat {
                Some(r) if r.is_finite() => format!("{:.4}", r),
                Some(_) => "NaN".to_string(),
                None => "-".to_string(),
            };
            lines.push(format!(
                "{:<12} {:>8.4} {:>8.4} {:>10.4} {:>10.4} {:>10} {:>10} {:>8} {:>10.6}",
                p.name,
                p.mean,
                p.std,
                p.ci_lower,
                p.ci_upper,
                fmt_ess(p.ess_bulk),
                fmt_ess(p.ess_tail),
                r_hat_s,
                p.mcse_mean,
            ));
        }

        lines.push("─".repeat(96));

        let avg_accept = if self.accept_rates.is_empty() {
            f64::NAN
        } else {
            self.accept_rates.iter().sum::<f64>() / self.accept_rates.len() as f64
        };
        lines.push(format!(
            "Mean accept rate: {:.2}  │  Divergences: {}",
            avg_accept, self.divergences
        ));

        if let Some(rec) = &self.recovery {
            lines.push(format!(
                "Recovery: |Δalpha| = {:.4}  |Δbeta| = {:.4}  RMSE = {:.4}",
                rec.abs_error_alpha, rec.abs_error_beta, rec.rmse
            ));
        }
        for advisory in &self.advisories {
            lines.push(format!("⚠  {advisory}"));
        }

        lines.join("\n")
    }
}

fn fmt_ess(ess: f64) -> String {
    if ess.is_finite() {
        format!("{:.0}", ess)
    } else {
        "NaN".to_string()
    }
}

/// Summarize one or more chains.
///
/// Chains of unequal length are truncated to the shortest before any
/// cross-chain statistic is computed. Convergence problems are returned as
/// advisories on the summary, never as errors.
pub fn summarize(chains: &[Chain], options: &SummaryOptions) -> PosteriorSummary {
    let n_chains = chains.len();
    let mut advisories = Vec::new();

    let shortest = chains.iter().map(|c| c.samples.len()).min().unwrap_or(0);
    let longest = chains.iter().map(|c| c.samples.len()).max().unwrap_or(0);
    if shortest < longest {
        advisories.push(Advisory::TruncatedChains { shortest, longest });
    }
    if n_chains < 2 {
        advisories.push(Advisory::InsufficientChains { chains: n_chains });
    }
    for chain in chains.iter().filter(|c| c.unreliable) {
        advisories.push(Advisory::UnreliableChain {
            chain_id: chain.chain_id,
            divergence_rate: chain.divergence_rate(),
        });
    }

    let param_names: Vec<String> = chains
        .first()
        .map(|c| c.param_names.clone())
        .unwrap_or_default();

    let mut params = Vec::with_capacity(param_names.len());
    for (pidx, name) in param_names.iter().enumerate() {
        // Extract per-chain traces for this parameter
        let traces: Vec<Vec<f64>> = chains
            .iter()
            .map(|c| c.samples[..shortest].iter().map(|s| s.values[pidx]).collect())
            .collect();
        let diag = param_diagnostics(name, &traces, options.credible_mass);

        let rhat_bad = diag
            .r_hat
            .is_some_and(|r| !(r.is_finite() && r < options.rhat_threshold));
        let ess_bad = !(diag.ess_bulk >= options.min_ess);
        if rhat_bad || ess_bad {
            advisories.push(Advisory::ConvergenceFailure {
                parameter: name.clone(),
                r_hat: diag.r_hat,
                ess_bulk: diag.ess_bulk,
            });
        }
        params.push(diag);
    }

    for advisory in &advisories {
        warn!(%advisory, "posterior advisory");
    }

    let recovery = options.truth.and_then(|truth| {
        let alpha = params.get(ALPHA)?.mean;
        let beta = params.get(BETA)?.mean;
        Some(recovery_metrics(Parameters::new(alpha, beta), truth))
    });

    PosteriorSummary {
        params,
        num_chains: n_chains,
        num_draws: shortest,
        credible_mass: options.credible_mass,
        accept_rates: chains.iter().map(|c| c.acceptance_rate).collect(),
        divergences: chains.iter().map(|c| c.divergences).sum(),
        advisories,
        recovery,
    }
}

/// Absolute error per parameter and RMSE of an estimate against the truth.
pub fn recovery_metrics(estimate: Parameters, truth: Parameters) -> Recovery {
    let abs_error_alpha = (estimate.alpha - truth.alpha).abs();
    let abs_error_beta = (estimate.beta - truth.beta).abs();
    let rmse = (0.5 * (abs_error_alpha.powi(2) + abs_error_beta.powi(2))).sqrt();
    Recovery {
        truth,
        abs_error_alpha,
        abs_error_beta,
        rmse,
    }
}

/// Posterior predictive means: prediction sequences for up to `max_draws`
/// posterior draws, spread evenly across the pooled chains.
pub fn posterior_predictive(
    chains: &[Chain],
    v_init: f64,
    trials: &TrialSequence,
    max_draws: usize,
) -> Vec<Vec<f64>> {
    let pooled: Vec<Parameters> = chains
        .iter()
        .flat_map(|c| c.samples.iter().map(|s| s.parameters()))
        .collect();
    if pooled.is_empty() || max_draws == 0 {
        return Vec::new();
    }
    let stride = pooled.len().div_ceil(max_draws);
    let candidates: Vec<Parameters> = pooled.into_iter().step_by(stride).collect();
    transition::predict_batch(&candidates, v_init, trials.trials())
}

fn param_diagnostics(name: &str, chains: &[Vec<f64>], credible_mass: f64) -> ParamDiagnostics {
    let total: usize = chains.iter().map(|c| c.len()).sum();
    if total == 0 {
        return ParamDiagnostics {
            name: name.to_string(),
            mean: f64::NAN,
            std: f64::NAN,
            ci_lower: f64::NAN,
            ci_upper: f64::NAN,
            ess_bulk: f64::NAN,
            ess_tail: f64::NAN,
            r_hat: None,
            mcse_mean: f64::NAN,
        };
    }

    let mean = chain_mean_all(chains);
    let std = chain_std_all(chains, mean);
    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    all.sort_unstable_by(f64::total_cmp);
    let tail = 0.5 * (1.0 - credible_mass);
    let ci_lower = quantile_sorted(&all, tail);
    let ci_upper = quantile_sorted(&all, 1.0 - tail);

    let enough = chains[0].len() >= MIN_DRAWS;
    let ess_bulk = if enough { ess_bulk_chains(chains) } else { f64::NAN };
    let ess_tail = if enough { ess_tail_chains(chains) } else { f64::NAN };
    let r_hat = (enough && chains.len() >= 2).then(|| r_hat_chains(chains));
    let mcse_mean = if ess_bulk > 0.0 {
        std / ess_bulk.sqrt()
    } else {
        f64::NAN
    };

    ParamDiagnostics {
        name: name.to_string(),
        mean,
        std,
        ci_lower,
        ci_upper,
        ess_bulk,
        ess_tail,
        r_hat,
        mcse_mean,
    }
}

// ── Internal helpers ────────────────────────────────────────────────

fn chain_mean_all(chains: &[Vec<f64>]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for c in chains {
        for &v in c {
            sum += v;
            n += 1;
        }
    }
    sum / n as f64
}

fn chain_std_all(chains: &[Vec<f64>], mean: f64) -> f64 {
    let mut sum_sq = 0.0;
    let mut n = 0usize;
    for c in chains {
        for &v in c {
            let d = v - mean;
            sum_sq += d * d;
            n += 1;
        }
    }
    if n < 2 {
        return 0.0;
    }
    (sum_sq / (n - 1) as f64).sqrt()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = q * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let frac = idx - lo as f64;
    sorted[lo] * (1.0 - frac) + sorted[hi.min(sorted.len() - 1)] * frac
}

/// Split R-hat: split each chain in half, treat as 2M chains, compute R-hat.
fn r_hat_chains(chains: &[Vec<f64>]) -> f64 {
    let split = split_chains(chains);
    let m = split.len() as f64;
    let n = split[0].len() as f64;

    let chain_means: Vec<f64> = split.iter().map(|c| mean(c)).collect();
    let grand_mean = chain_means.iter().sum::<f64>() / m;

    // Between-chain variance B
    let b = n / (m - 1.0)
        * chain_means
            .iter()
            .map(|&cm| (cm - grand_mean).powi(2))
            .sum::<f64>();

    // Within-chain variance W
    let w = split
        .iter()
        .map(|c| {
            let cm = mean(c);
            c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n - 1.0)
        })
        .sum::<f64>()
        / m;

    if w < 1e-30 {
        return f64::NAN;
    }

    let var_hat = (n - 1.0) / n * w + b / n;
    (var_hat / w).sqrt()
}

/// Bulk ESS using rank-normalized values (Vehtari et al. 2021).
fn ess_bulk_chains(chains: &[Vec<f64>]) -> f64 {
    let ranked = rank_normalize(chains);
    ess_raw(&ranked)
}

/// Tail ESS: minimum of ESS for the lower and upper tail indicators.
fn ess_tail_chains(chains: &[Vec<f64>]) -> f64 {
    let mut sorted: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    sorted.sort_unstable_by(f64::total_cmp);
    let q05 = quantile_sorted(&sorted, 0.05);
    let q95 = quantile_sorted(&sorted, 0.95);

    let indicator = |pred: &dyn Fn(f64) -> bool| -> Vec<Vec<f64>> {
        chains
            .iter()
            .map(|c| c.iter().map(|&x| if pred(x) { 1.0 } else { 0.0 }).collect())
            .collect()
    };
    let lower = indicator(&|x| x <= q05);
    let upper = indicator(&|x| x >= q95);

    let ess_lo = ess_raw(&lower);
    let ess_hi = ess_raw(&upper);
    ess_lo.min(ess_hi)
}

/// Rank-normalize: replace values with their normal scores.
fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n_chains = chains.len();
    let n_per = chains[0].len();
    let total = n_chains * n_per;

    // Collect (value, chain_idx, draw_idx)
    let mut indexed: Vec<(f64, usize, usize)> = Vec::with_capacity(total);
    for (ci, chain) in chains.iter().enumerate() {
        for (di, &v) in chain.iter().enumerate() {
            indexed.push((v, ci, di));
        }
    }
    indexed.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

    // Assign ranks (average ties)
    let mut ranks = vec![0.0f64; total];
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j < total && indexed[j].0 == indexed[i].0 {
            j += 1;
        }
        let avg_rank = (i + j + 1) as f64 / 2.0;
        for r in &mut ranks[i..j] {
            *r = avg_rank;
        }
        i = j;
    }

    // Normal scores: Φ⁻¹((rank - 3/8) / (N + 1/4))
    let n_f = total as f64;
    let mut result = vec![vec![0.0; n_per]; n_chains];
    for (idx, &(_, ci, di)) in indexed.iter().enumerate() {
        let p = (ranks[idx] - 0.375) / (n_f + 0.25);
        result[ci][di] = inv_normal_cdf(p);
    }
    result
}

/// ESS from split chains using autocorrelation (Geyer's initial monotone sequence).
fn ess_raw(chains: &[Vec<f64>]) -> f64 {
    let split = split_chains(chains);
    let m = split.len();
    let n = split[0].len();

    let chain_means: Vec<f64> = split.iter().map(|c| mean(c)).collect();
    let m_f = m as f64;
    let n_f = n as f64;

    let w: f64 = split
        .iter()
        .map(|c| {
            let cm = mean(c);
            c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n_f - 1.0)
        })
        .sum::<f64>()
        / m_f;

    if w < 1e-30 {
        return f64::NAN;
    }

    let rho = |lag: usize| -> f64 {
        let mut gamma = 0.0f64;
        for (ci, chain) in split.iter().enumerate() {
            let cm = chain_means[ci];
            for t in 0..n - lag {
                gamma += (chain[t] - cm) * (chain[t + lag] - cm);
            }
        }
        gamma /= m_f * (n_f - 1.0);
        1.0 - (w - gamma) / w
    };

    // Sum consecutive pairs while positive, forcing them non-increasing.
    let mut tau = -1.0f64;
    let mut prev_pair = f64::INFINITY;
    let mut t = 0;
    while t + 1 < n {
        let pair_sum = rho(t) + rho(t + 1);
        if pair_sum < 0.0 {
            break;
        }
        let pair_sum = pair_sum.min(prev_pair);
        tau += 2.0 * pair_sum;
        prev_pair = pair_sum;
        t += 2;
    }
    tau = tau.max(1.0 / (m_f * n_f).log10());

    m_f * n_f / tau
}

fn split_chains(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut split = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let mid = chain.len() / 2;
        // Drop the middle draw of odd-length chains so halves match.
        split.push(chain[..mid].to_vec());
        split.push(chain[chain.len() - mid..].to_vec());
    }
    split
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn inv_normal_cdf(p: f64) -> f64 {
    Normal::standard().inverse_cdf(p)
}
