//! Simulation-trained amortized estimator.
//!
//! Draws parameters from the priors, simulates a trial sequence for each,
//! and fits a ridge regression from summary features of the sequence to the
//! logit-scaled parameters. Estimating a new sequence is then a single
//! matrix-vector product instead of a sampler run. Uncertainty is the
//! training residual spread pushed back through the transform.

use crate::config::{FitConfig, ParamPrior, PriorFamily};
use crate::error::{Error, Result};
use crate::estimator::{ParameterEstimate, ParameterEstimator};
use crate::graph::ParamTransform;
use crate::seed::{SeedStream, TRAINING_STREAM};
use crate::simulate::simulate_with_rng;
use crate::trials::{Parameters, TrialSequence};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Beta, Distribution, Open01};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Number of summary features per sequence.
pub const FEATURE_COUNT: usize = 8;

/// Trials averaged for the early-level feature.
const EARLY_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmortizedConfig {
    /// Simulated sequences used for training.
    pub training_size: usize,
    /// Trials per simulated sequence.
    pub trial_count: usize,
    /// Ridge penalty on standardized features.
    pub ridge: f64,
    pub seed: u64,
    pub alpha_prior: ParamPrior,
    pub beta_prior: ParamPrior,
    pub observation_sigma: f64,
    pub v_init: f64,
}

impl Default for AmortizedConfig {
    fn default() -> Self {
        Self::from_fit_config(&FitConfig::default())
    }
}

impl AmortizedConfig {
    pub fn from_fit_config(config: &FitConfig) -> Self {
        Self {
            training_size: 2000,
            trial_count: config.trial_count,
            ridge: 1e-3,
            seed: config.seed,
            alpha_prior: config.prior_spec.alpha,
            beta_prior: config.beta_prior(),
            observation_sigma: config.observation_sigma,
            v_init: config.v_init,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.training_size <= FEATURE_COUNT {
            return Err(Error::config(
                "training_size",
                format!("must exceed the feature count {FEATURE_COUNT}"),
            ));
        }
        if self.trial_count == 0 {
            return Err(Error::config("trial_count", "must be positive"));
        }
        if !(self.ridge.is_finite() && self.ridge > 0.0) {
            return Err(Error::config("ridge", "must be positive"));
        }
        if !(self.observation_sigma.is_finite() && self.observation_sigma > 0.0) {
            return Err(Error::config("observation_sigma", "must be positive"));
        }
        for (name, prior) in [("alpha_prior", &self.alpha_prior), ("beta_prior", &self.beta_prior)] {
            if !(prior.lower.is_finite() && prior.upper.is_finite() && prior.lower < prior.upper) {
                return Err(Error::config(name, "bounds must be finite and ordered"));
            }
        }
        Ok(())
    }
}

/// Fitted regression state.
#[derive(Debug, Clone)]
struct Trained {
    feature_mean: Array1<f64>,
    feature_scale: Array1<f64>,
    target_mean: Array1<f64>,
    /// FEATURE_COUNT x 2 coefficients on standardized features.
    weights: Array2<f64>,
    /// Residual standard deviation on the logit scale, per parameter.
    residual_sd: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct AmortizedEstimator {
    config: AmortizedConfig,
    alpha_transform: ParamTransform,
    beta_transform: ParamTransform,
    trained: Option<Trained>,
}

impl AmortizedEstimator {
    pub fn new(config: AmortizedConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            alpha_transform: bounded(&config.alpha_prior),
            beta_transform: bounded(&config.beta_prior),
            config,
            trained: None,
        })
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Simulate the training set and fit the regression.
    pub fn train(&mut self) -> Result<()> {
        let n = self.config.training_size;
        let mut rng = SeedStream::new(self.config.seed).stream(TRAINING_STREAM);

        info!(
            examples = n,
            trials = self.config.trial_count,
            seed = self.config.seed,
            "amortized training started"
        );

        let mut features = Array2::<f64>::zeros((n, FEATURE_COUNT));
        let mut targets = Array2::<f64>::zeros((n, 2));
        let report_every = (n / 4).max(1);

        for i in 0..n {
            let params = Parameters::new(
                draw_prior(&self.config.alpha_prior, &mut rng)?,
                draw_prior(&self.config.beta_prior, &mut rng)?,
            );
            let sim = simulate_with_rng(
                params,
                self.config.trial_count,
                self.config.observation_sigma,
                self.config.v_init,
                &mut rng,
            )?;
            features.row_mut(i).assign(&summary_features(&sim.trials)?);
            targets[[i, 0]] = self.alpha_transform.inverse(params.alpha);
            targets[[i, 1]] = self.beta_transform.inverse(params.beta);

            if (i + 1) % report_every == 0 {
                debug!(simulated = i + 1, total = n, "amortized training progress");
            }
        }

        let trained = fit_ridge(&features, &targets, self.config.ridge)?;
        info!(
            alpha_residual_sd = trained.residual_sd[0],
            beta_residual_sd = trained.residual_sd[1],
            "amortized training finished"
        );
        self.trained = Some(trained);
        Ok(())
    }
}

impl ParameterEstimator for AmortizedEstimator {
    fn estimate(&self, trials: &TrialSequence) -> Result<ParameterEstimate> {
        let trained = self.trained.as_ref().ok_or(Error::EstimatorNotTrained)?;
        let x = (summary_features(trials)? - &trained.feature_mean) / &trained.feature_scale;
        let z = x.dot(&trained.weights) + &trained.target_mean;

        let (alpha, alpha_sd) = delta_method(&self.alpha_transform, z[0], trained.residual_sd[0]);
        let (beta, beta_sd) = delta_method(&self.beta_transform, z[1], trained.residual_sd[1]);
        Ok(ParameterEstimate {
            alpha,
            beta,
            alpha_sd,
            beta_sd,
        })
    }
}

fn bounded(prior: &ParamPrior) -> ParamTransform {
    ParamTransform::BoundedSigmoid {
        lower: prior.lower,
        upper: prior.upper,
    }
}

/// Value and standard deviation of `transform(z)` for `z` with spread `sd`.
fn delta_method(transform: &ParamTransform, z: f64, sd: f64) -> (f64, f64) {
    let value = transform.forward(z);
    let slope = match *transform {
        ParamTransform::BoundedSigmoid { lower, upper } => {
            let u = (value - lower) / (upper - lower);
            (upper - lower) * u * (1.0 - u)
        }
        ParamTransform::Exp => value,
        ParamTransform::Identity => 1.0,
    };
    (value, slope * sd)
}

/// Draw strictly inside the prior's open interval.
fn draw_prior<R: Rng + ?Sized>(prior: &ParamPrior, rng: &mut R) -> Result<f64> {
    let u: f64 = match prior.family {
        PriorFamily::Uniform => Open01.sample(rng),
        PriorFamily::ScaledBeta { a, b } => {
            let dist = Beta::new(a, b).map_err(|e| Error::config("prior", e.to_string()))?;
            dist.sample(rng).clamp(f64::EPSILON, 1.0 - f64::EPSILON)
        }
    };
    Ok(prior.lower + (prior.upper - prior.lower) * u)
}

/// Summary statistics of a trial sequence used as regression inputs.
///
/// Rewards on stimulus trials carry the value signal: their early level
/// tracks `beta * v_init`, their drift and autocorrelation track the
/// learning rate. Rewards on blank trials measure the noise floor.
pub fn summary_features(trials: &TrialSequence) -> Result<Array1<f64>> {
    if trials.is_empty() {
        return Err(Error::EmptyTrials);
    }
    let cued: Vec<f64> = trials
        .trials()
        .iter()
        .filter(|t| t.stimulus == 1)
        .map(|t| t.reward)
        .collect();
    let blank: Vec<f64> = trials
        .trials()
        .iter()
        .filter(|t| t.stimulus == 0)
        .map(|t| t.reward)
        .collect();

    let mut f = Array1::<f64>::zeros(FEATURE_COUNT);
    if !cued.is_empty() {
        let early = &cued[..cued.len().min(EARLY_WINDOW)];
        let late = &cued[cued.len() - (cued.len() / 4).max(1)..];
        let diffs: Vec<f64> = cued.windows(2).map(|w| w[1] - w[0]).collect();
        f[0] = mean(early);
        f[1] = mean(&cued);
        f[2] = mean(late);
        f[3] = log_var(&diffs);
        f[4] = log_var(&cued);
        f[5] = lag1_autocorr(&cued);
        f[7] = (mean(early).abs() + 1e-6).ln();
    }
    f[6] = log_var(&blank);
    Ok(f)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn log_var(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    (var + 1e-12).ln()
}

fn lag1_autocorr(xs: &[f64]) -> f64 {
    if xs.len() < 3 {
        return 0.0;
    }
    let m = mean(xs);
    let denom: f64 = xs.iter().map(|x| (x - m).powi(2)).sum();
    if denom < 1e-300 {
        return 0.0;
    }
    let num: f64 = xs.windows(2).map(|w| (w[0] - m) * (w[1] - m)).sum();
    num / denom
}

/// Ridge regression on standardized features with centered targets.
fn fit_ridge(features: &Array2<f64>, targets: &Array2<f64>, ridge: f64) -> Result<Trained> {
    let n = features.nrows() as f64;
    let instability = || Error::NumericalInstability {
        context: "empty training set".to_string(),
    };
    let feature_mean = features.mean_axis(Axis(0)).ok_or_else(instability)?;
    let feature_scale = features
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s > 1e-12 { s } else { 1.0 });
    let target_mean = targets.mean_axis(Axis(0)).ok_or_else(instability)?;

    let x = (features - &feature_mean) / &feature_scale;
    let y = targets - &target_mean;

    let mut gram = x.t().dot(&x);
    for i in 0..gram.nrows() {
        gram[[i, i]] += ridge * n;
    }
    let rhs = x.t().dot(&y);
    let weights = cholesky_solve(&gram, &rhs)?;

    let residuals = &y - &x.dot(&weights);
    let resid_sd = |col: usize| (residuals.column(col).mapv(|r| r * r).sum() / n).sqrt();

    Ok(Trained {
        feature_mean,
        feature_scale,
        target_mean,
        weights,
        residual_sd: [resid_sd(0), resid_sd(1)],
    })
}

/// Solves `A X = B` for symmetric positive definite `A` through nalgebra's
/// Cholesky factorization.
fn cholesky_solve(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n || b.nrows() != n {
        return Err(Error::SingularSystem);
    }
    let chol = to_dmatrix(a).cholesky().ok_or(Error::SingularSystem)?;
    let x = chol.solve(&to_dmatrix(b));
    if x.iter().any(|v| !v.is_finite()) {
        return Err(Error::SingularSystem);
    }
    Ok(Array2::from_shape_fn(x.shape(), |(i, j)| x[(i, j)]))
}

/// Copy an `ndarray` matrix into a column-major `DMatrix`.
fn to_dmatrix(m: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}
