use ndarray::Array2;
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use rwfit_core::amortized::{AmortizedConfig, AmortizedEstimator};
use rwfit_core::config::{FitConfig, LikelihoodKind};
use rwfit_core::estimator::ParameterEstimator;
use rwfit_core::sampler::{self, PosteriorFit};
use rwfit_core::{Error, Parameters, SeedStream, TrialSequence};

fn to_py_err(e: Error) -> PyErr {
    let msg = format!("[E{}] {}", e.code(), e);
    match e {
        Error::NumericalInstability { .. } | Error::SingularSystem => PyRuntimeError::new_err(msg),
        _ => PyValueError::new_err(msg),
    }
}

fn read_trials(
    stimuli: &PyReadonlyArray1<'_, f64>,
    rewards: &PyReadonlyArray1<'_, f64>,
) -> PyResult<TrialSequence> {
    // Anything other than exactly 0 or 1 maps to an invalid code and is rejected below.
    let stimuli: Vec<u8> = stimuli
        .as_slice()?
        .iter()
        .map(|&s| if s == 0.0 { 0 } else if s == 1.0 { 1 } else { u8::MAX })
        .collect();
    TrialSequence::from_columns(&stimuli, rewards.as_slice()?).map_err(to_py_err)
}

#[pyclass]
struct FitResult {
    result: PosteriorFit,
}

#[pymethods]
impl FitResult {
    fn get_samples<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        let Some(first) = self.result.chains.first() else {
            return Ok(dict);
        };
        for (pidx, name) in first.param_names.iter().enumerate() {
            let all_samples: Vec<f64> = self
                .result
                .chains
                .iter()
                .flat_map(|c| c.trace(pidx))
                .collect();
            dict.set_item(name, PyArray1::from_vec(py, all_samples))?;
        }
        Ok(dict)
    }

    /// Draws per parameter as (chains, draws) arrays, cut to the shortest chain.
    fn get_samples_2d<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        let Some(first) = self.result.chains.first() else {
            return Ok(dict);
        };
        let n_chains = self.result.chains.len();
        let n_draws = self.result.summary.num_draws;
        for (pidx, name) in first.param_names.iter().enumerate() {
            let mut arr = Array2::<f64>::zeros((n_chains, n_draws));
            for (ci, chain) in self.result.chains.iter().enumerate() {
                for (di, draw) in chain.samples[..n_draws].iter().enumerate() {
                    arr[[ci, di]] = draw.values[pidx];
                }
            }
            dict.set_item(name, arr.into_pyarray(py))?;
        }
        Ok(dict)
    }

    fn mean<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        for p in &self.result.summary.params {
            dict.set_item(&p.name, p.mean)?;
        }
        Ok(dict)
    }

    fn std<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        for p in &self.result.summary.params {
            dict.set_item(&p.name, p.std)?;
        }
        Ok(dict)
    }

    /// Full per-parameter diagnostics keyed by parameter name.
    fn summary<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        for p in &self.result.summary.params {
            let row = PyDict::new(py);
            row.set_item("mean", p.mean)?;
            row.set_item("std", p.std)?;
            row.set_item("ci_lower", p.ci_lower)?;
            row.set_item("ci_upper", p.ci_upper)?;
            row.set_item("ess_bulk", p.ess_bulk)?;
            row.set_item("ess_tail", p.ess_tail)?;
            row.set_item("r_hat", p.r_hat)?;
            row.set_item("mcse_mean", p.mcse_mean)?;
            dict.set_item(&p.name, row)?;
        }
        if let Some(rec) = &self.result.summary.recovery {
            let row = PyDict::new(py);
            row.set_item("abs_error_alpha", rec.abs_error_alpha)?;
            row.set_item("abs_error_beta", rec.abs_error_beta)?;
            row.set_item("rmse", rec.rmse)?;
            dict.set_item("recovery", row)?;
        }
        Ok(dict)
    }

    fn advisories<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        let items: Vec<String> = self
            .result
            .summary
            .advisories
            .iter()
            .map(|a| a.to_string())
            .collect();
        PyList::new(py, items)
    }

    fn accept_rates<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        PyList::new(py, &self.result.summary.accept_rates)
    }

    fn divergences<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        PyList::new(py, self.result.chains.iter().map(|c| c.divergences))
    }

    fn unreliable<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyList>> {
        PyList::new(py, self.result.chains.iter().map(|c| c.unreliable))
    }

    #[getter]
    fn clipped_count(&self) -> usize {
        self.result.clipped_count
    }

    #[getter]
    fn converged(&self) -> bool {
        self.result.summary.converged()
    }

    fn to_table(&self) -> String {
        self.result.summary.to_table()
    }

    fn __repr__(&self) -> String {
        let parts: Vec<String> = self
            .result
            .summary
            .params
            .iter()
            .map(|p| format!("  {}: mean={:.4}, std={:.4}", p.name, p.mean, p.std))
            .collect();
        format!(
            "rwfit FitResult ({} chains × {} draws)\n{}",
            self.result.summary.num_chains,
            self.result.summary.num_draws,
            parts.join("\n")
        )
    }
}

/// Simulate a trial sequence from ground-truth parameters.
#[pyfunction]
#[pyo3(signature = (alpha, beta, trial_count=1000, sigma=0.1, v_init=1.0, beta_max=5.0, seed=42))]
#[allow(clippy::too_many_arguments)]
fn simulate<'py>(
    py: Python<'py>,
    alpha: f64,
    beta: f64,
    trial_count: usize,
    sigma: f64,
    v_init: f64,
    beta_max: f64,
    seed: u64,
) -> PyResult<Bound<'py, PyDict>> {
    let sim = rwfit_core::simulate(
        Parameters::new(alpha, beta),
        beta_max,
        trial_count,
        sigma,
        v_init,
        SeedStream::new(seed),
    )
    .map_err(to_py_err)?;

    let stimuli: Vec<f64> = sim.trials.stimuli().into_iter().map(f64::from).collect();
    let dict = PyDict::new(py);
    dict.set_item("stimuli", PyArray1::from_vec(py, stimuli))?;
    dict.set_item("rewards", PyArray1::from_vec(py, sim.trials.rewards()))?;
    dict.set_item("clean_predictions", PyArray1::from_vec(py, sim.clean_predictions))?;
    Ok(dict)
}

/// Sample the posterior of (alpha, beta) for one trial sequence.
///
/// `config_json` is a (possibly partial) JSON configuration document; the
/// keyword arguments override it.
#[pyfunction]
#[pyo3(signature = (
    stimuli, rewards, config_json=None, chains=None, draws=None, warmup=None, seed=None,
    beta_max=None, sigma=None, v_init=None, likelihood="gaussian", epsilon=1e-3,
    true_alpha=None, true_beta=None, threads=None
))]
#[allow(clippy::too_many_arguments)]
fn fit(
    py: Python<'_>,
    stimuli: PyReadonlyArray1<'_, f64>,
    rewards: PyReadonlyArray1<'_, f64>,
    config_json: Option<&str>,
    chains: Option<usize>,
    draws: Option<usize>,
    warmup: Option<usize>,
    seed: Option<u64>,
    beta_max: Option<f64>,
    sigma: Option<f64>,
    v_init: Option<f64>,
    likelihood: &str,
    epsilon: f64,
    true_alpha: Option<f64>,
    true_beta: Option<f64>,
    threads: Option<usize>,
) -> PyResult<FitResult> {
    let trials = read_trials(&stimuli, &rewards)?;

    let mut config: FitConfig = match config_json {
        Some(doc) => serde_json::from_str(doc)
            .map_err(|e| PyValueError::new_err(format!("invalid config document: {e}")))?,
        None => FitConfig::default(),
    };
    config.trial_count = trials.len().max(1);
    if let Some(v) = chains {
        config.chain_count = v;
    }
    if let Some(v) = draws {
        config.sample_count = v;
    }
    if let Some(v) = warmup {
        config.warmup_count = v;
    }
    if let Some(v) = seed {
        config.seed = v;
    }
    if let Some(v) = beta_max {
        config.beta_max = v;
    }
    if let Some(v) = sigma {
        config.observation_sigma = v;
    }
    if let Some(v) = v_init {
        config.v_init = v;
    }
    if let Some(v) = threads {
        config.num_threads = v;
    }
    config.true_alpha = true_alpha.or(config.true_alpha);
    config.true_beta = true_beta.or(config.true_beta);
    config.likelihood = match likelihood {
        "gaussian" => LikelihoodKind::Gaussian,
        "beta" => LikelihoodKind::Beta { epsilon },
        other => {
            return Err(PyValueError::new_err(format!(
                "unknown likelihood {other:?}, expected \"gaussian\" or \"beta\""
            )))
        }
    };

    let result = py
        .allow_threads(|| sampler::fit(&config, trials))
        .map_err(to_py_err)?;
    Ok(FitResult { result })
}

/// Train the amortized estimator on simulated data, then estimate one sequence.
#[pyfunction]
#[pyo3(signature = (stimuli, rewards, training_size=2000, seed=42, beta_max=5.0, sigma=0.1, v_init=1.0))]
#[allow(clippy::too_many_arguments)]
fn amortized_fit<'py>(
    py: Python<'py>,
    stimuli: PyReadonlyArray1<'_, f64>,
    rewards: PyReadonlyArray1<'_, f64>,
    training_size: usize,
    seed: u64,
    beta_max: f64,
    sigma: f64,
    v_init: f64,
) -> PyResult<Bound<'py, PyDict>> {
    let trials = read_trials(&stimuli, &rewards)?;
    let base = FitConfig {
        trial_count: trials.len().max(1),
        seed,
        beta_max,
        observation_sigma: sigma,
        v_init,
        ..FitConfig::default()
    };
    base.validate().map_err(to_py_err)?;
    let config = AmortizedConfig {
        training_size,
        ..AmortizedConfig::from_fit_config(&base)
    };

    let estimate = py
        .allow_threads(|| {
            let mut estimator = AmortizedEstimator::new(config)?;
            estimator.train()?;
            estimator.estimate(&trials)
        })
        .map_err(to_py_err)?;

    let dict = PyDict::new(py);
    dict.set_item("alpha", estimate.alpha)?;
    dict.set_item("beta", estimate.beta)?;
    dict.set_item("alpha_sd", estimate.alpha_sd)?;
    dict.set_item("beta_sd", estimate.beta_sd)?;
    Ok(dict)
}

/// Route library log events to stderr. Returns False if logging was already set up.
#[pyfunction]
#[pyo3(signature = (level="info"))]
fn init_logging(level: &str) -> bool {
    rwfit_core::logging::init_logging(level)
}

#[pymodule]
fn rwfit(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<FitResult>()?;
    m.add_function(wrap_pyfunction!(simulate, m)?)?;
    m.add_function(wrap_pyfunction!(fit, m)?)?;
    m.add_function(wrap_pyfunction!(amortized_fit, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    Ok(())
}
