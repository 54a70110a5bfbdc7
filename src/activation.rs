//! Activation functions.
//!
//! A layer computes a weighted input `z = W x + b` per neuron and then applies
//! an activation element-wise: `a = f(z)`.
//!
//! Both the weighted input and the activation are kept in the evaluator's
//! batched buffers, so derivatives are expressed in terms of `z` rather than
//! the cached output.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
/// Element-wise activation applied to a layer's weighted input.
pub enum Activation {
    /// `f(x) = x`
    Linear,
    /// `f(x) = max(0, x)`
    RectifiedLinear,
    /// `f(x) = 1 / (1 + e^-x)`
    Sigmoid,
}

/// Function pointers for one activation kind.
///
/// Kernels look this up once per task and call through the pointers in their
/// inner loops instead of matching on the variant per element.
#[derive(Debug, Clone, Copy)]
pub struct ActivationFns {
    pub forward: fn(f32) -> f32,
    pub derivative: fn(f32) -> f32,
}

const LINEAR: ActivationFns = ActivationFns {
    forward: linear,
    derivative: linear_prime,
};

const RECTIFIED_LINEAR: ActivationFns = ActivationFns {
    forward: rectified_linear,
    derivative: rectified_linear_prime,
};

const SIGMOID: ActivationFns = ActivationFns {
    forward: sigmoid,
    derivative: sigmoid_prime,
};

impl Activation {
    pub const ALL: [Activation; 3] = [
        Activation::Linear,
        Activation::RectifiedLinear,
        Activation::Sigmoid,
    ];

    /// Dispatch table entry for this activation.
    #[inline]
    pub fn fns(self) -> ActivationFns {
        match self {
            Activation::Linear => LINEAR,
            Activation::RectifiedLinear => RECTIFIED_LINEAR,
            Activation::Sigmoid => SIGMOID,
        }
    }

    #[inline]
    pub fn forward(self, weighted_input: f32) -> f32 {
        (self.fns().forward)(weighted_input)
    }

    /// Derivative of the activation at `weighted_input`.
    #[inline]
    pub fn derivative(self, weighted_input: f32) -> f32 {
        (self.fns().derivative)(weighted_input)
    }
}

#[inline]
fn linear(x: f32) -> f32 {
    x
}

#[inline]
fn linear_prime(_x: f32) -> f32 {
    1.0
}

#[inline]
fn rectified_linear(x: f32) -> f32 {
    x.max(0.0)
}

/// Step function; the derivative at exactly zero is taken as 0.
#[inline]
fn rectified_linear_prime(x: f32) -> f32 {
    if x > 0.0 { 1.0 } else { 0.0 }
}

/// Numerically stable logistic sigmoid.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// `sigmoid(x) * (1 - sigmoid(x))`
#[inline]
pub fn sigmoid_prime(x: f32) -> f32 {
    let s = sigmoid(x);
    s * (1.0 - s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn central_difference(f: fn(f32) -> f32, x: f32) -> f32 {
        let eps = 1e-2_f32;
        (f(x + eps) - f(x - eps)) / (2.0 * eps)
    }

    #[test]
    fn sigmoid_basic_values() {
        assert_abs_diff_eq!(Activation::Sigmoid.forward(0.0), 0.5, epsilon = 1e-6);
        assert!(Activation::Sigmoid.forward(10.0) > 0.999);
        assert!(Activation::Sigmoid.forward(-10.0) < 0.001);

        // Large magnitudes must not overflow into NaN.
        assert_eq!(Activation::Sigmoid.forward(-1000.0), 0.0);
        assert_eq!(Activation::Sigmoid.forward(1000.0), 1.0);
    }

    #[test]
    fn sigmoid_derivative_matches_finite_difference() {
        for &x in &[-4.0_f32, -1.5, -0.2, 0.0, 0.3, 2.0, 5.0] {
            let analytic = Activation::Sigmoid.derivative(x);
            let numeric = central_difference(sigmoid, x);
            assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-3);

            let s = sigmoid(x);
            assert_abs_diff_eq!(analytic, s * (1.0 - s), epsilon = 1e-7);
        }
    }

    #[test]
    fn rectified_linear_clamps_and_steps() {
        let relu = Activation::RectifiedLinear;
        assert_eq!(relu.forward(-2.0), 0.0);
        assert_eq!(relu.forward(3.0), 3.0);

        assert_eq!(relu.derivative(1e-3), 1.0);
        assert_eq!(relu.derivative(42.0), 1.0);
        assert_eq!(relu.derivative(-1e-3), 0.0);
        assert_eq!(relu.derivative(-42.0), 0.0);
    }

    #[test]
    fn linear_is_identity() {
        for &x in &[-3.5_f32, 0.0, 7.25] {
            assert_eq!(Activation::Linear.forward(x), x);
            assert_eq!(Activation::Linear.derivative(x), 1.0);
        }
    }

    #[test]
    fn dispatch_table_agrees_with_methods() {
        for act in Activation::ALL {
            let fns = act.fns();
            for &x in &[-1.0_f32, 0.5, 2.0] {
                assert_eq!((fns.forward)(x), act.forward(x));
                assert_eq!((fns.derivative)(x), act.derivative(x));
            }
        }
    }
}
