use crate::error::{check_open_interval, Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One trial: whether the stimulus was present and the reward observed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub stimulus: u8,
    pub reward: f64,
}

impl Trial {
    /// Stimulus as a multiplicative 0/1 weight.
    #[inline]
    pub fn weight(&self) -> f64 {
        if self.stimulus == 0 {
            0.0
        } else {
            1.0
        }
    }
}

/// Immutable ordered sequence of trials.
///
/// Backed by an `Arc` so the model, every chain and the estimators can share
/// one copy across threads without cloning the data.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSequence {
    trials: Arc<[Trial]>,
}

impl TrialSequence {
    /// Build a sequence, rejecting stimuli other than 0/1 and non-finite rewards.
    pub fn new(trials: Vec<Trial>) -> Result<Self> {
        for (i, t) in trials.iter().enumerate() {
            if t.stimulus > 1 {
                return Err(Error::config(
                    "stimulus",
                    format!("trial {i} has stimulus {}, expected 0 or 1", t.stimulus),
                ));
            }
            if !t.reward.is_finite() {
                return Err(Error::config(
                    "reward",
                    format!("trial {i} has non-finite reward {}", t.reward),
                ));
            }
        }
        Ok(Self {
            trials: trials.into(),
        })
    }

    /// Build from parallel stimulus/reward columns.
    pub fn from_columns(stimuli: &[u8], rewards: &[f64]) -> Result<Self> {
        if stimuli.len() != rewards.len() {
            return Err(Error::config(
                "rewards",
                format!(
                    "{} stimuli but {} rewards",
                    stimuli.len(),
                    rewards.len()
                ),
            ));
        }
        Self::new(
            stimuli
                .iter()
                .zip(rewards)
                .map(|(&stimulus, &reward)| Trial { stimulus, reward })
                .collect(),
        )
    }

    pub fn empty() -> Self {
        Self {
            trials: Vec::new().into(),
        }
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn stimuli(&self) -> Vec<u8> {
        self.trials.iter().map(|t| t.stimulus).collect()
    }

    pub fn rewards(&self) -> Vec<f64> {
        self.trials.iter().map(|t| t.reward).collect()
    }
}

/// Learning rate and stimulus gain of the value-update process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub alpha: f64,
    pub beta: f64,
}

impl Parameters {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Check `alpha ∈ (0, 1)` and `beta ∈ (0, beta_max)`.
    pub fn validate(&self, beta_max: f64) -> Result<()> {
        check_open_interval("alpha", self.alpha, 0.0, 1.0)?;
        check_open_interval("beta", self.beta, 0.0, beta_max)
    }
}
