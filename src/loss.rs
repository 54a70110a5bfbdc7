//! Output losses.
//!
//! The evaluator only ever needs the *error* of the output layer, i.e. the
//! derivative of the cost with respect to the output weighted input. The cost
//! values themselves are diagnostics for training harnesses.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Activation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
/// Cost used to seed backpropagation at the output layer.
pub enum OutputLoss {
    /// Cross-entropy over sigmoid outputs.
    ///
    /// The sigmoid derivative cancels, leaving `error = actual - target`.
    #[default]
    CrossEntropy,
    /// Quadratic cost `0.5 * (actual - target)^2`.
    ///
    /// `error = (actual - target) * f'(weighted_input)`.
    Quadratic,
}

impl OutputLoss {
    /// Output-layer error for one element.
    #[inline]
    pub fn output_error(
        self,
        activation: Activation,
        actual: f32,
        target: f32,
        weighted_input: f32,
    ) -> f32 {
        let delta = actual - target;
        match self {
            OutputLoss::CrossEntropy => delta,
            OutputLoss::Quadratic => delta * activation.derivative(weighted_input),
        }
    }

    /// Cost value over matching `actual`/`target` buffers.
    pub fn cost(self, actual: &[f32], target: &[f32]) -> f32 {
        match self {
            OutputLoss::CrossEntropy => cross_entropy_cost(actual, target),
            OutputLoss::Quadratic => quadratic_cost(actual, target),
        }
    }
}

/// `0.5 * sum((actual - target)^2)`.
pub fn quadratic_cost(actual: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        actual.len(),
        target.len(),
        "actual len {} does not match target len {}",
        actual.len(),
        target.len()
    );

    let mut sum_sq = 0.0_f32;
    for (&a, &t) in actual.iter().zip(target) {
        let diff = a - t;
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    0.5 * sum_sq
}

/// `-sum(t ln a + (1 - t) ln(1 - a))` with `a` clamped away from 0 and 1.
pub fn cross_entropy_cost(actual: &[f32], target: &[f32]) -> f32 {
    assert_eq!(
        actual.len(),
        target.len(),
        "actual len {} does not match target len {}",
        actual.len(),
        target.len()
    );

    const CLAMP: f32 = 1e-7;
    let mut sum = 0.0_f32;
    for (&a, &t) in actual.iter().zip(target) {
        let a = a.clamp(CLAMP, 1.0 - CLAMP);
        sum -= t * a.ln() + (1.0 - t) * (1.0 - a).ln();
    }
    sum
}

/// Sum of absolute differences divided by the number of batch rows.
///
/// This is the per-example error reported by a training step, not a
/// per-element mean.
pub fn mean_absolute_error(actual: &[f32], target: &[f32], count: usize) -> f32 {
    assert_eq!(
        actual.len(),
        target.len(),
        "actual len {} does not match target len {}",
        actual.len(),
        target.len()
    );
    if count == 0 {
        return 0.0;
    }

    let sum: f32 = actual
        .iter()
        .zip(target)
        .map(|(&a, &t)| (a - t).abs())
        .sum();
    sum / count as f32
}
