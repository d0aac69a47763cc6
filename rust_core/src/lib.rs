pub mod amortized;
pub mod autodiff;
pub mod chain;
pub mod config;
pub mod diagnostics;
pub mod distributions;
pub mod error;
pub mod estimator;
pub mod graph;
pub mod logging;
pub mod model;
pub mod nuts;
pub mod progress;
pub mod sampler;
pub mod seed;
pub mod simulate;
pub mod transition;
pub mod trials;

pub use chain::{Chain, PosteriorSample};
pub use config::{FitConfig, LikelihoodKind, ParamPrior, PriorFamily, PriorSpec, SigmaSpec};
pub use diagnostics::{summarize, Advisory, PosteriorSummary, SummaryOptions};
pub use error::{Error, Result};
pub use estimator::{McmcEstimator, ParameterEstimate, ParameterEstimator};
pub use model::{LogDensity, RwModel};
pub use sampler::{fit, sample, simulate_and_fit, PosteriorFit, SamplerConfig};
pub use seed::SeedStream;
pub use simulate::{simulate, Simulation};
pub use trials::{Parameters, Trial, TrialSequence};

// Future: dense mass matrix adaptation for strongly correlated posteriors
// such as alpha and beta under a short v_init transient.
