use crate::config::{ParamPrior, PriorFamily};
use crate::graph::{Graph, NodeId, ParamTransform};

// ── Bounded (lower < x < upper, logit-transform) ───────────────────

pub struct Bounded;

impl Bounded {
    /// Samples raw on (-∞, +∞), transforms via x = lower + (upper-lower) * sigmoid(raw).
    /// Jacobian: log|dx/draw| = log((upper-lower) * sigmoid(raw) * (1-sigmoid(raw)))
    ///
    /// The prior is either flat on the interval or a Beta(a, b) rescaled to it.
    pub fn prior(graph: &mut Graph, name: &str, prior: &ParamPrior) -> NodeId {
        let (lower, upper) = (prior.lower, prior.upper);
        let raw = graph.add_param_with_transform(
            name,
            ParamTransform::BoundedSigmoid { lower, upper },
        );
        let sig = graph.sigmoid(raw);
        let range = upper - lower;
        let range_node = graph.add_constant(range);
        let lower_node = graph.add_constant(lower);

        // x = lower + range * sigmoid(raw)
        let scaled = graph.mul(range_node, sig);
        let x = graph.add(lower_node, scaled);
        graph.name_node(x, name);

        match prior.family {
            PriorFamily::Uniform => {
                graph.uniform_logp(x, lower, upper);
            }
            PriorFamily::ScaledBeta { a, b } => {
                // p(x) = Beta(sig; a, b) / range
                graph.beta_logp(sig, a, b);
                let norm = graph.add_constant(-range.ln());
                graph.add_logp_term(norm);
            }
        }

        // Jacobian: log(range) + log(sigmoid) + log(1 - sigmoid).
        // Evaluates to -inf once sigmoid saturates, so a position whose
        // constrained value rounds onto a bound is never accepted.
        let log_range = graph.add_constant(range.ln());
        let log_sig = graph.log(sig);
        let one = graph.add_constant(1.0);
        let one_minus_sig = graph.sub(one, sig);
        let log_one_minus_sig = graph.log(one_minus_sig);
        let log_sum = graph.add(log_sig, log_one_minus_sig);
        let jac = graph.add(log_range, log_sum);
        graph.add_logp_term(jac);
        x
    }
}

// ── HalfNormal (x > 0, log-transform) ──────────────────────────────

pub struct HalfNormal;

impl HalfNormal {
    /// Samples raw on (-∞, +∞), transforms via x = exp(raw).
    /// Jacobian: log|dx/draw| = raw.
    pub fn prior(graph: &mut Graph, name: &str, scale: f64) -> NodeId {
        let raw = graph.add_param_with_transform(name, ParamTransform::Exp);
        let x = graph.exp(raw);
        graph.name_node(x, name);
        graph.half_normal_logp(x, scale);
        graph.add_logp_term(raw);
        x
    }
}

// ── Observation models ─────────────────────────────────────────────

pub struct Normal;

impl Normal {
    pub fn observed(graph: &mut Graph, mu_vec: NodeId, sigma: NodeId, obs: Vec<f64>) -> NodeId {
        let obs_idx = graph.add_obs_data(obs);
        graph.normal_obs_logp(mu_vec, sigma, obs_idx)
    }
}

pub struct BetaDist;

impl BetaDist {
    /// Observations must already lie strictly inside (0, 1).
    pub fn observed(graph: &mut Graph, a: NodeId, b: NodeId, obs: Vec<f64>) -> NodeId {
        let obs_idx = graph.add_obs_data(obs);
        graph.beta_obs_logp(a, b, obs_idx)
    }
}

/// Clip values into `(epsilon, 1 - epsilon)`, returning the clipped data and
/// how many observations were moved.
pub fn clip_unit_interval(values: &[f64], epsilon: f64) -> (Vec<f64>, usize) {
    let mut clipped = 0usize;
    let out = values
        .iter()
        .map(|&v| {
            let c = v.clamp(epsilon, 1.0 - epsilon);
            if c != v {
                clipped += 1;
            }
            c
        })
        .collect();
    (out, clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::{eval_logp, grad_logp};

    #[test]
    fn test_uniform_prior_pushforward_matches_logistic_density() {
        // Uniform(0, 1) pushed through the logit is the standard logistic:
        // log p(raw) = log σ(raw) + log(1 - σ(raw))
        let mut g = Graph::new();
        Bounded::prior(&mut g, "alpha", &ParamPrior::uniform(0.0, 1.0));
        for raw in [-3.0f64, -0.5, 0.0, 1.2] {
            let s = 1.0 / (1.0 + (-raw).exp());
            let expected = s.ln() + (1.0 - s).ln();
            assert!((eval_logp(&g, &[raw]) - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_scaled_uniform_prior_includes_range() {
        // On (0, 4) the flat prior and log(range) Jacobian cancel exactly.
        let mut g = Graph::new();
        Bounded::prior(&mut g, "beta", &ParamPrior::uniform(0.0, 4.0));
        let raw = 0.7f64;
        let s = 1.0 / (1.0 + (-raw).exp());
        assert!((eval_logp(&g, &[raw]) - (s.ln() + (1.0 - s).ln())).abs() < 1e-12);
    }

    #[test]
    fn test_saturated_sigmoid_is_rejected() {
        let mut g = Graph::new();
        Bounded::prior(&mut g, "alpha", &ParamPrior::uniform(0.0, 1.0));
        assert_eq!(eval_logp(&g, &[60.0]), f64::NEG_INFINITY);
        assert_eq!(eval_logp(&g, &[-800.0]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_scaled_beta_prior_gradient() {
        let mut g = Graph::new();
        let prior = ParamPrior {
            family: PriorFamily::ScaledBeta { a: 2.0, b: 5.0 },
            lower: 0.0,
            upper: 3.0,
        };
        Bounded::prior(&mut g, "beta", &prior);
        let q = [0.3];
        let (_, grad) = grad_logp(&g, &q);
        let h = 1e-6;
        let fd = (eval_logp(&g, &[q[0] + h]) - eval_logp(&g, &[q[0] - h])) / (2.0 * h);
        assert!((grad[0] - fd).abs() < 1e-5);
    }

    #[test]
    fn test_half_normal_prior_gradient() {
        let mut g = Graph::new();
        HalfNormal::prior(&mut g, "sigma", 0.5);
        let q = [-1.1];
        let (_, grad) = grad_logp(&g, &q);
        let h = 1e-6;
        let fd = (eval_logp(&g, &[q[0] + h]) - eval_logp(&g, &[q[0] - h])) / (2.0 * h);
        assert!((grad[0] - fd).abs() < 1e-5);
    }

    #[test]
    fn test_clip_counts() {
        let (out, n) = clip_unit_interval(&[0.0, 0.5, 1.0, 1.2, 1e-9], 1e-6);
        assert_eq!(n, 4);
        assert!(out.iter().all(|&v| v > 0.0 && v < 1.0));
        assert_eq!(out[1], 0.5);
    }
}
