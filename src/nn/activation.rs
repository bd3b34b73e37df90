//! Activation Functions
//!
//! SchNet uses the shifted softplus `ssp(x) = ln(0.5 e^x + 0.5)`, which is
//! zero at the origin and smooth everywhere, plus the identity for layers
//! without a nonlinearity.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Types of activation functions available
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActivationType {
    /// Shifted softplus: ln(0.5 exp(x) + 0.5)
    ShiftedSoftplus,
    /// Linear (identity): x
    Linear,
}

/// Activation function with its derivative for backpropagation
pub trait Activation: Send + Sync {
    /// Apply the activation elementwise
    fn forward_batch(&self, x: &Array2<f64>) -> Array2<f64>;

    /// Derivative evaluated at the pre-activation values
    fn backward_batch(&self, x: &Array2<f64>) -> Array2<f64>;
}

/// Shifted softplus
pub struct ShiftedSoftplus;

impl Activation for ShiftedSoftplus {
    fn forward_batch(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(ssp)
    }

    fn backward_batch(&self, x: &Array2<f64>) -> Array2<f64> {
        x.mapv(sigmoid)
    }
}

/// Linear (identity) activation
pub struct Linear;

impl Activation for Linear {
    fn forward_batch(&self, x: &Array2<f64>) -> Array2<f64> {
        x.clone()
    }

    fn backward_batch(&self, x: &Array2<f64>) -> Array2<f64> {
        Array2::ones(x.dim())
    }
}

/// Create an activation function from type
pub fn create_activation(activation_type: ActivationType) -> Box<dyn Activation> {
    match activation_type {
        ActivationType::ShiftedSoftplus => Box::new(ShiftedSoftplus),
        ActivationType::Linear => Box::new(Linear),
    }
}

/// Shifted softplus, stable for large |x|
pub fn ssp(x: f64) -> f64 {
    // softplus(x) = max(x, 0) + ln(1 + e^-|x|)
    x.max(0.0) + (-x.abs()).exp().ln_1p() - std::f64::consts::LN_2
}

/// Logistic sigmoid, the derivative of softplus
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_ssp_matches_definition() {
        for &x in &[-3.0, -0.5, 0.0, 0.7, 4.0] {
            let direct = (0.5 * f64::exp(x) + 0.5).ln();
            assert_relative_eq!(ssp(x), direct, epsilon = 1e-12);
        }
        assert_relative_eq!(ssp(0.0), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_ssp_is_stable() {
        assert!(ssp(800.0).is_finite());
        assert_relative_eq!(ssp(800.0), 800.0 - std::f64::consts::LN_2, epsilon = 1e-9);
        assert_relative_eq!(ssp(-800.0), -std::f64::consts::LN_2, epsilon = 1e-12);
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let act = ShiftedSoftplus;
        let x = array![[-2.0, -0.1, 0.0, 1.3]];
        let grad = act.backward_batch(&x);
        let h = 1e-6;
        for (j, &v) in x.iter().enumerate() {
            let numeric = (ssp(v + h) - ssp(v - h)) / (2.0 * h);
            assert_relative_eq!(grad[[0, j]], numeric, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_linear() {
        let act = create_activation(ActivationType::Linear);
        let x = array![[1.0, -2.0]];
        assert_eq!(act.forward_batch(&x), x);
        assert_eq!(act.backward_batch(&x), Array2::<f64>::ones((1, 2)));
    }
}
