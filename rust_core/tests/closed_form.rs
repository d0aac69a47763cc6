//! Conjugate normal-normal model: the posterior is known exactly.

use rwfit_core::{sample, summarize, LogDensity, SamplerConfig, SummaryOptions};

/// theta ~ Normal(prior_mean, prior_sd), y_i ~ Normal(theta, noise_sd).
struct ConjugateNormal {
    prior_mean: f64,
    prior_sd: f64,
    noise_sd: f64,
    data: Vec<f64>,
}

impl ConjugateNormal {
    fn posterior(&self) -> (f64, f64) {
        let prior_prec = 1.0 / self.prior_sd.powi(2);
        let like_prec = self.data.len() as f64 / self.noise_sd.powi(2);
        let var = 1.0 / (prior_prec + like_prec);
        let sum: f64 = self.data.iter().sum();
        let mean = var * (prior_prec * self.prior_mean + sum / self.noise_sd.powi(2));
        (mean, var)
    }
}

impl LogDensity for ConjugateNormal {
    fn dim(&self) -> usize {
        1
    }

    fn param_names(&self) -> Vec<String> {
        vec!["theta".to_string()]
    }

    fn log_density_and_grad(&self, q: &[f64], grad: &mut [f64]) -> f64 {
        let theta = q[0];
        let zp = (theta - self.prior_mean) / self.prior_sd;
        let mut lp = -0.5 * zp * zp;
        let mut g = -zp / self.prior_sd;
        for &y in &self.data {
            let z = (y - theta) / self.noise_sd;
            lp -= 0.5 * z * z;
            g += z / self.noise_sd;
        }
        grad[0] = g;
        lp
    }
}

#[test]
fn test_sampler_matches_analytic_posterior() {
    let target = ConjugateNormal {
        prior_mean: 0.0,
        prior_sd: 2.0,
        noise_sd: 1.0,
        data: vec![1.2, 0.4, 2.1, 1.7, 0.9, 1.3, 1.8, 0.2, 1.1, 1.5],
    };
    let (mean, var) = target.posterior();
    let sd = var.sqrt();

    let config = SamplerConfig {
        num_chains: 4,
        num_draws: 2000,
        num_warmup: 500,
        seed: 31,
        ..SamplerConfig::default()
    };
    let chains = sample(&target, &config).unwrap();
    let summary = summarize(&chains, &SummaryOptions::default());
    let theta = summary.param("theta").unwrap();

    assert!((theta.mean - mean).abs() < 0.1 * sd, "mean {} vs {}", theta.mean, mean);
    assert!(
        (theta.std.powi(2) / var - 1.0).abs() < 0.15,
        "var {} vs {}",
        theta.std.powi(2),
        var
    );
    assert!(theta.r_hat.unwrap() < 1.01);
    assert!(theta.ess_bulk > 1000.0);
    // 94% interval of a normal is mean ± 1.881 sd
    assert!((theta.ci_lower - (mean - 1.881 * sd)).abs() < 0.15 * sd);
    assert!((theta.ci_upper - (mean + 1.881 * sd)).abs() < 0.15 * sd);
    assert!(summary.converged());
}
