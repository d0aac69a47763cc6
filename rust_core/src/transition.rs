//! Rescorla-Wagner value-update recurrence.
//!
//! ```text
//! V_0            = v_init
//! prediction_t   = beta * V_{t-1} * stimulus_t
//! V_t            = V_{t-1} + alpha * (reward_t - prediction_t) * stimulus_t
//! ```
//!
//! The fold is written once, generic over [`Real`], and evaluated either on
//! plain `f64` or on [`Dual`] numbers that carry the derivative with respect
//! to `(alpha, beta)` forward through the recurrence. The stimulus enters
//! multiplicatively, so there is no data-dependent branch to differentiate
//! through, and a trial with `stimulus = 0` leaves `V` bit-for-bit unchanged.

use crate::trials::{Parameters, Trial};
use rayon::prelude::*;
use std::ops::{Add, Mul, Sub};

/// Scalar type the recurrence can be evaluated on.
pub trait Real: Copy + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> {
    fn constant(x: f64) -> Self;
    fn value(&self) -> f64;
}

impl Real for f64 {
    #[inline]
    fn constant(x: f64) -> Self {
        x
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }
}

/// Forward-mode dual number: a value and its gradient w.r.t. `(alpha, beta)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    pub value: f64,
    pub grad: [f64; 2],
}

impl Dual {
    /// Seed the `idx`-th independent variable (0 = alpha, 1 = beta).
    pub fn variable(value: f64, idx: usize) -> Self {
        let mut grad = [0.0; 2];
        grad[idx] = 1.0;
        Self { value, grad }
    }
}

impl Add for Dual {
    type Output = Dual;

    #[inline]
    fn add(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value + rhs.value,
            grad: [self.grad[0] + rhs.grad[0], self.grad[1] + rhs.grad[1]],
        }
    }
}

impl Sub for Dual {
    type Output = Dual;

    #[inline]
    fn sub(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value - rhs.value,
            grad: [self.grad[0] - rhs.grad[0], self.grad[1] - rhs.grad[1]],
        }
    }
}

impl Mul for Dual {
    type Output = Dual;

    #[inline]
    fn mul(self, rhs: Dual) -> Dual {
        Dual {
            value: self.value * rhs.value,
            grad: [
                self.grad[0] * rhs.value + self.value * rhs.grad[0],
                self.grad[1] * rhs.value + self.value * rhs.grad[1],
            ],
        }
    }
}

impl Real for Dual {
    #[inline]
    fn constant(x: f64) -> Self {
        Dual {
            value: x,
            grad: [0.0; 2],
        }
    }

    #[inline]
    fn value(&self) -> f64 {
        self.value
    }
}

/// Prediction for a trial given the value carried in from the previous trial.
#[inline]
pub fn prediction<T: Real>(beta: T, v_prev: T, trial: &Trial) -> T {
    beta * v_prev * T::constant(trial.weight())
}

/// Value after observing `trial`, given its prediction.
#[inline]
pub fn update<T: Real>(alpha: T, v_prev: T, prediction: T, trial: &Trial) -> T {
    let error = T::constant(trial.reward) - prediction;
    v_prev + alpha * error * T::constant(trial.weight())
}

/// One transition: returns `(prediction_t, V_t)`.
#[inline]
pub fn step<T: Real>(alpha: T, beta: T, v_prev: T, trial: &Trial) -> (T, T) {
    let p = prediction(beta, v_prev, trial);
    (p, update(alpha, v_prev, p, trial))
}

/// Fold the recurrence over `trials`, returning one prediction per trial.
pub fn predict<T: Real>(alpha: T, beta: T, v_init: f64, trials: &[Trial]) -> Vec<T> {
    let mut out = Vec::with_capacity(trials.len());
    let mut v = T::constant(v_init);
    for trial in trials {
        let (p, next) = step(alpha, beta, v, trial);
        out.push(p);
        v = next;
    }
    out
}

/// Plain-valued predictions.
pub fn predict_values(params: Parameters, v_init: f64, trials: &[Trial]) -> Vec<f64> {
    predict(params.alpha, params.beta, v_init, trials)
}

/// Predictions together with `d prediction_t / d(alpha, beta)`.
pub fn predict_with_gradient(
    params: Parameters,
    v_init: f64,
    trials: &[Trial],
) -> (Vec<f64>, Vec<[f64; 2]>) {
    let alpha = Dual::variable(params.alpha, 0);
    let beta = Dual::variable(params.beta, 1);
    predict(alpha, beta, v_init, trials)
        .into_iter()
        .map(|d| (d.value, d.grad))
        .unzip()
}

/// Vector-Jacobian product `Σ_t upstream_t * d prediction_t / d(alpha, beta)`.
///
/// Runs the dual fold without materialising the prediction sequence, so the
/// auxiliary memory is constant in the trial count.
pub fn prediction_vjp(params: Parameters, v_init: f64, trials: &[Trial], upstream: &[f64]) -> [f64; 2] {
    let alpha = Dual::variable(params.alpha, 0);
    let beta = Dual::variable(params.beta, 1);
    let mut v = Dual::constant(v_init);
    let mut acc = [0.0f64; 2];
    for (trial, &u) in trials.iter().zip(upstream) {
        let (p, next) = step(alpha, beta, v, trial);
        acc[0] += u * p.grad[0];
        acc[1] += u * p.grad[1];
        v = next;
    }
    acc
}

/// Evaluate the recurrence for many candidates sharing one trial sequence.
pub fn predict_batch(candidates: &[Parameters], v_init: f64, trials: &[Trial]) -> Vec<Vec<f64>> {
    candidates
        .par_iter()
        .map(|&params| predict_values(params, v_init, trials))
        .collect()
}

/// Batched predictions with their per-trial Jacobians.
pub fn predict_batch_with_gradient(
    candidates: &[Parameters],
    v_init: f64,
    trials: &[Trial],
) -> Vec<(Vec<f64>, Vec<[f64; 2]>)> {
    candidates
        .par_iter()
        .map(|&params| predict_with_gradient(params, v_init, trials))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn trials_strategy() -> impl Strategy<Value = Vec<Trial>> {
        prop::collection::vec(
            (0u8..=1, -5.0f64..5.0).prop_map(|(stimulus, reward)| Trial { stimulus, reward }),
            0..60,
        )
    }

    #[test]
    fn test_hand_computed_sequence() {
        let trials = [
            Trial { stimulus: 1, reward: 1.0 },
            Trial { stimulus: 0, reward: 3.0 },
            Trial { stimulus: 1, reward: 0.0 },
        ];
        let p = predict_values(Parameters::new(0.5, 2.0), 1.0, &trials);
        // V0 = 1: pred 2, V1 = 1 + 0.5 * (1 - 2) = 0.5
        // stimulus 0: pred 0, V2 = 0.5
        // pred 2 * 0.5 = 1
        assert_eq!(p, vec![2.0, 0.0, 1.0]);
    }

    #[test]
    fn test_single_trial_uses_initial_value() {
        let trials = [Trial { stimulus: 1, reward: 0.3 }];
        let p = predict_values(Parameters::new(0.4, 1.5), 0.8, &trials);
        assert_eq!(p, vec![1.5 * 0.8]);
    }

    #[test]
    fn test_empty_sequence() {
        assert!(predict_values(Parameters::new(0.4, 1.5), 0.8, &[]).is_empty());
    }

    #[test]
    fn test_batch_matches_single() {
        let trials: Vec<Trial> = (0..20)
            .map(|i| Trial { stimulus: (i % 3 != 0) as u8, reward: (i as f64 * 0.7).sin() })
            .collect();
        let cands = [Parameters::new(0.1, 2.0), Parameters::new(0.7, 0.4)];
        let batch = predict_batch(&cands, 0.5, &trials);
        for (c, b) in cands.iter().zip(&batch) {
            assert_eq!(&predict_values(*c, 0.5, &trials), b);
        }
        let with_grad = predict_batch_with_gradient(&cands, 0.5, &trials);
        assert_eq!(with_grad[1], predict_with_gradient(cands[1], 0.5, &trials));
    }

    proptest! {
        #[test]
        fn prop_zero_learning_rate_keeps_initial_value(
            trials in trials_strategy(),
            beta in 0.01f64..5.0,
            v_init in -2.0f64..2.0,
        ) {
            let p = predict_values(Parameters::new(0.0, beta), v_init, &trials);
            for (pred, t) in p.iter().zip(&trials) {
                // prediction = beta * v_init * stimulus, i.e. V never moves away from v_init
                prop_assert_eq!(*pred, beta * v_init * t.weight());
            }
        }

        #[test]
        fn prop_absent_stimulus_is_identity_update(
            trials in trials_strategy(),
            alpha in 0.0f64..1.0,
            beta in 0.0f64..5.0,
        ) {
            let mut v = 0.3f64;
            for t in &trials {
                let (_, next) = step(alpha, beta, v, t);
                if t.stimulus == 0 {
                    prop_assert_eq!(next.to_bits(), v.to_bits());
                }
                v = next;
            }
        }

        #[test]
        fn prop_gradient_matches_finite_differences(
            trials in trials_strategy(),
            alpha in 0.05f64..0.6,
            beta in 0.1f64..2.0,
        ) {
            let upstream: Vec<f64> = (0..trials.len()).map(|i| ((i as f64) * 0.37).cos()).collect();
            let g = prediction_vjp(Parameters::new(alpha, beta), 0.5, &trials, &upstream);
            let f = |a: f64, b: f64| -> f64 {
                predict_values(Parameters::new(a, b), 0.5, &trials)
                    .iter()
                    .zip(&upstream)
                    .map(|(p, u)| p * u)
                    .sum()
            };
            let h = 1e-6;
            let da = (f(alpha + h, beta) - f(alpha - h, beta)) / (2.0 * h);
            let db = (f(alpha, beta + h) - f(alpha, beta - h)) / (2.0 * h);
            prop_assert!((g[0] - da).abs() < 1e-4 * (1.0 + da.abs()), "alpha: {} vs {}", g[0], da);
            prop_assert!((g[1] - db).abs() < 1e-4 * (1.0 + db.abs()), "beta: {} vs {}", g[1], db);
        }
    }
}
