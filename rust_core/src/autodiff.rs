use crate::graph::{sigmoid, Graph, Op};
use crate::transition;
use crate::trials::Parameters;
use statrs::function::beta::ln_beta;
use statrs::function::gamma::digamma;

/// Value produced by evaluating a node. Scalars and vectors are tracked
/// separately so the graph can mix the vector-valued prediction op with
/// scalar parameter operations without heap allocation for the common
/// scalar case.
#[derive(Debug, Clone)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Value {
    pub fn as_scalar(&self) -> f64 {
        match self {
            Value::Scalar(v) => *v,
            Value::Vector(_) => panic!("expected scalar, got vector"),
        }
    }

    pub fn as_vector(&self) -> &[f64] {
        match self {
            Value::Vector(v) => v,
            Value::Scalar(_) => panic!("expected vector, got scalar"),
        }
    }
}

/// Forward-evaluate every node in the graph and return the per-node values.
pub fn forward(graph: &Graph, params: &[f64]) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::with_capacity(graph.nodes.len());

    for node in &graph.nodes {
        let val = match &node.op {
            Op::Param(idx) => Value::Scalar(params[*idx]),
            Op::Constant(c) => Value::Scalar(*c),
            Op::Add(a, b) => Value::Scalar(values[a.0].as_scalar() + values[b.0].as_scalar()),
            Op::Sub(a, b) => Value::Scalar(values[a.0].as_scalar() - values[b.0].as_scalar()),
            Op::Mul(a, b) => Value::Scalar(values[a.0].as_scalar() * values[b.0].as_scalar()),
            Op::Exp(a) => Value::Scalar(values[a.0].as_scalar().exp()),
            Op::Log(a) => Value::Scalar(values[a.0].as_scalar().ln()),
            Op::Sigmoid(a) => Value::Scalar(sigmoid(values[a.0].as_scalar())),
            Op::UniformLogP { x, lower, upper } => {
                let xv = values[x.0].as_scalar();
                Value::Scalar(uniform_logp_scalar(xv, *lower, *upper))
            }
            Op::BetaLogP { x, a, b } => {
                Value::Scalar(beta_logp_scalar(values[x.0].as_scalar(), *a, *b))
            }
            Op::HalfNormalLogP { x, scale } => {
                Value::Scalar(half_normal_logp_scalar(values[x.0].as_scalar(), *scale))
            }
            Op::RescorlaWagner {
                alpha,
                beta,
                trials_idx,
                v_init,
            } => {
                let params = Parameters::new(values[alpha.0].as_scalar(), values[beta.0].as_scalar());
                let trials = graph.trial_sets[*trials_idx].trials();
                Value::Vector(transition::predict_values(params, *v_init, trials))
            }
            Op::NormalObsLogP {
                mu_vec,
                sigma,
                obs_data_idx,
            } => {
                let mu = values[mu_vec.0].as_vector();
                let sv = values[sigma.0].as_scalar();
                let obs = &graph.obs_vectors[*obs_data_idx];
                Value::Scalar(normal_obs_logp_sum(mu, sv, obs))
            }
            Op::BetaObsLogP { a, b, obs_data_idx } => {
                let av = values[a.0].as_scalar();
                let bv = values[b.0].as_scalar();
                let obs = &graph.obs_vectors[*obs_data_idx];
                Value::Scalar(beta_obs_logp_sum(av, bv, obs))
            }
        };
        values.push(val);
    }

    values
}

/// Compute the total log-probability (sum of all logp_terms).
pub fn eval_logp(graph: &Graph, params: &[f64]) -> f64 {
    let values = forward(graph, params);
    graph
        .logp_terms
        .iter()
        .map(|id| values[id.0].as_scalar())
        .sum()
}

/// Reverse-mode autodiff: compute gradient of total log-probability w.r.t. params.
pub fn grad_logp(graph: &Graph, params: &[f64]) -> (f64, Vec<f64>) {
    let values = forward(graph, params);
    let n = graph.nodes.len();

    let total_logp: f64 = graph
        .logp_terms
        .iter()
        .map(|id| values[id.0].as_scalar())
        .sum();

    // Vector-valued nodes get vector adjoints via a separate table.
    let mut adj_scalar = vec![0.0f64; n];
    let mut adj_vector: Vec<Option<Vec<f64>>> = vec![None; n];

    // Seed: d(total_logp)/d(logp_term) = 1.0
    for &id in &graph.logp_terms {
        adj_scalar[id.0] += 1.0;
    }

    for node in graph.nodes.iter().rev() {
        let idx = node.id.0;
        let a_s = adj_scalar[idx];

        match &node.op {
            Op::Param(_) | Op::Constant(_) => {}

            Op::Add(a, b) => {
                adj_scalar[a.0] += a_s;
                adj_scalar[b.0] += a_s;
            }
            Op::Sub(a, b) => {
                adj_scalar[a.0] += a_s;
                adj_scalar[b.0] -= a_s;
            }
            Op::Mul(a, b) => {
                let va = values[a.0].as_scalar();
                let vb = values[b.0].as_scalar();
                adj_scalar[a.0] += a_s * vb;
                adj_scalar[b.0] += a_s * va;
            }
            Op::Exp(a) => {
                adj_scalar[a.0] += a_s * values[idx].as_scalar();
            }
            Op::Log(a) => {
                adj_scalar[a.0] += a_s / values[a.0].as_scalar();
            }
            Op::Sigmoid(a) => {
                let s = values[idx].as_scalar();
                adj_scalar[a.0] += a_s * s * (1.0 - s);
            }
            // Flat inside its support.
            Op::UniformLogP { .. } => {}
            Op::BetaLogP { x, a, b } => {
                let xv = values[x.0].as_scalar();
                adj_scalar[x.0] += a_s * ((a - 1.0) / xv - (b - 1.0) / (1.0 - xv));
            }
            Op::HalfNormalLogP { x, scale } => {
                let xv = values[x.0].as_scalar();
                adj_scalar[x.0] += a_s * (-xv / (scale * scale));
            }
            Op::RescorlaWagner {
                alpha,
                beta,
                trials_idx,
                v_init,
            } => {
                // Adjoint arrives from the observation op consuming the predictions.
                if let Some(upstream) = adj_vector[idx].take() {
                    let params =
                        Parameters::new(values[alpha.0].as_scalar(), values[beta.0].as_scalar());
                    let trials = graph.trial_sets[*trials_idx].trials();
                    let g = transition::prediction_vjp(params, *v_init, trials, &upstream);
                    adj_scalar[alpha.0] += g[0];
                    adj_scalar[beta.0] += g[1];
                }
            }
            Op::NormalObsLogP {
                mu_vec,
                sigma,
                obs_data_idx,
            } => {
                let mu = values[mu_vec.0].as_vector();
                let sv = values[sigma.0].as_scalar();
                if !(sv > 0.0) {
                    continue;
                }
                let obs = &graph.obs_vectors[*obs_data_idx];
                let s2 = sv * sv;

                // Gradient w.r.t. mu_vec (vector)
                let dmu: Vec<f64> = mu
                    .iter()
                    .zip(obs.iter())
                    .map(|(m, o)| a_s * (o - m) / s2)
                    .collect();
                merge_vec_adj(&mut adj_vector[mu_vec.0], &dmu);

                // Gradient w.r.t. sigma (scalar)
                let dsigma: f64 = mu
                    .iter()
                    .zip(obs.iter())
                    .map(|(m, o)| {
                        let diff = o - m;
                        diff * diff / (s2 * sv) - 1.0 / sv
                    })
                    .sum::<f64>();
                adj_scalar[sigma.0] += a_s * dsigma;
            }
            Op::BetaObsLogP { a, b, obs_data_idx } => {
                let av = values[a.0].as_scalar();
                let bv = values[b.0].as_scalar();
                if !(av > 0.0 && bv > 0.0) {
                    continue;
                }
                let obs = &graph.obs_vectors[*obs_data_idx];
                let (sum_ln, sum_ln1m) = beta_sufficient_stats(obs);
                let n_obs = obs.len() as f64;
                let psi_ab = digamma(av + bv);
                adj_scalar[a.0] += a_s * (sum_ln - n_obs * (digamma(av) - psi_ab));
                adj_scalar[b.0] += a_s * (sum_ln1m - n_obs * (digamma(bv) - psi_ab));
            }
        }
    }

    let mut grad = vec![0.0; graph.param_count];
    for node in &graph.nodes {
        if let Op::Param(pidx) = node.op {
            grad[pidx] = adj_scalar[node.id.0];
        }
    }

    (total_logp, grad)
}

fn merge_vec_adj(slot: &mut Option<Vec<f64>>, incoming: &[f64]) {
    match slot {
        Some(ref mut existing) => {
            for (e, i) in existing.iter_mut().zip(incoming.iter()) {
                *e += i;
            }
        }
        None => {
            *slot = Some(incoming.to_vec());
        }
    }
}

fn uniform_logp_scalar(x: f64, lower: f64, upper: f64) -> f64 {
    if x > lower && x < upper {
        -(upper - lower).ln()
    } else {
        f64::NEG_INFINITY
    }
}

fn beta_logp_scalar(x: f64, a: f64, b: f64) -> f64 {
    if !(x > 0.0 && x < 1.0) {
        return f64::NEG_INFINITY;
    }
    (a - 1.0) * x.ln() + (b - 1.0) * (1.0 - x).ln() - ln_beta(a, b)
}

fn half_normal_logp_scalar(x: f64, scale: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NEG_INFINITY;
    }
    std::f64::consts::LN_2 - 0.5 * std::f64::consts::TAU.ln() - scale.ln()
        - 0.5 * (x * x) / (scale * scale)
}

fn normal_obs_logp_sum(mu: &[f64], sigma: f64, obs: &[f64]) -> f64 {
    if !(sigma > 0.0) {
        return f64::NEG_INFINITY;
    }
    let s2 = sigma * sigma;
    let log_norm = -0.5 * std::f64::consts::TAU.ln() - sigma.ln();
    let n = obs.len() as f64;
    let sum_sq: f64 = mu
        .iter()
        .zip(obs.iter())
        .map(|(m, o)| {
            let d = o - m;
            d * d
        })
        .sum();
    n * log_norm - 0.5 * sum_sq / s2
}

fn beta_sufficient_stats(obs: &[f64]) -> (f64, f64) {
    obs.iter()
        .fold((0.0, 0.0), |(s, s1m), &r| (s + r.ln(), s1m + (1.0 - r).ln()))
}

fn beta_obs_logp_sum(a: f64, b: f64, obs: &[f64]) -> f64 {
    if !(a > 0.0 && b > 0.0) {
        return f64::NEG_INFINITY;
    }
    let (sum_ln, sum_ln1m) = beta_sufficient_stats(obs);
    (a - 1.0) * sum_ln + (b - 1.0) * sum_ln1m - obs.len() as f64 * ln_beta(a, b)
}
