//! Error types for model construction, simulation and estimation.
//!
//! Only setup-time failures are errors. Numerical trouble inside the
//! sampling loop is recorded on the draw (a divergence) and convergence
//! problems are reported as [`crate::diagnostics::Advisory`] values on the
//! summary.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A parameter value or prior bound lies outside its declared open domain.
    #[error("{name} = {value} is outside the open interval ({lower}, {upper})")]
    InvalidParameterDomain {
        name: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("invalid value for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("trial sequence is empty")]
    EmptyTrials,

    /// Non-finite log density where a finite one is required before sampling starts.
    #[error("numerical instability: {context}")]
    NumericalInstability { context: String },

    #[error("amortized estimator must be trained before use")]
    EstimatorNotTrained,

    #[error("linear system is not positive definite")]
    SingularSystem,
}

impl Error {
    /// Stable numeric code for structured reporting.
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidParameterDomain { .. } => 10,
            Error::InvalidConfig { .. } => 11,
            Error::EmptyTrials => 12,
            Error::NumericalInstability { .. } => 20,
            Error::EstimatorNotTrained => 30,
            Error::SingularSystem => 31,
        }
    }

    pub(crate) fn config(field: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check that `value` lies strictly inside `(lower, upper)`.
pub(crate) fn check_open_interval(name: &str, value: f64, lower: f64, upper: f64) -> Result<()> {
    if value.is_finite() && value > lower && value < upper {
        Ok(())
    } else {
        Err(Error::InvalidParameterDomain {
            name: name.to_string(),
            value,
            lower,
            upper,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_interval_excludes_bounds() {
        assert!(check_open_interval("alpha", 0.5, 0.0, 1.0).is_ok());
        assert!(check_open_interval("alpha", 0.0, 0.0, 1.0).is_err());
        assert!(check_open_interval("alpha", 1.0, 0.0, 1.0).is_err());
        assert!(check_open_interval("alpha", f64::NAN, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_codes_are_distinct() {
        let errs = [
            Error::InvalidParameterDomain {
                name: "a".into(),
                value: 2.0,
                lower: 0.0,
                upper: 1.0,
            },
            Error::config("x", "bad"),
            Error::EmptyTrials,
            Error::NumericalInstability {
                context: "x".into(),
            },
            Error::EstimatorNotTrained,
            Error::SingularSystem,
        ];
        let mut codes: Vec<u32> = errs.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }
}
