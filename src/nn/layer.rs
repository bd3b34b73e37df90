//! Dense (Fully Connected) Layer Implementation
//!
//! A dense layer performs: output = activation(input * weights + bias)

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::{create_activation, ActivationType};
use crate::error::{Error, Result};

/// Gradients of one dense layer's parameters
#[derive(Debug, Clone)]
pub struct DenseGradients {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
}

impl DenseGradients {
    pub fn zeros(input_size: usize, output_size: usize) -> Self {
        Self {
            weights: Array2::zeros((input_size, output_size)),
            biases: Array1::zeros(output_size),
        }
    }

    /// Accumulate another gradient into this one
    pub fn add(&mut self, other: &DenseGradients) {
        self.weights += &other.weights;
        self.biases += &other.biases;
    }

    pub fn scale(&mut self, factor: f64) {
        self.weights *= factor;
        self.biases *= factor;
    }
}

/// Dense layer with weights, biases, and activation function
#[derive(Serialize, Deserialize)]
pub struct DenseLayer {
    /// Weight matrix (input_size x output_size)
    pub weights: Array2<f64>,
    /// Bias vector (output_size)
    pub biases: Array1<f64>,
    /// Activation function type
    pub activation_type: ActivationType,
    /// Input size
    pub input_size: usize,
    /// Output size (number of neurons)
    pub output_size: usize,

    // Cached values for backpropagation (not serialized)
    #[serde(skip)]
    last_input: Option<Array2<f64>>,
    #[serde(skip)]
    last_z: Option<Array2<f64>>,
}

impl DenseLayer {
    /// Create a new dense layer with Glorot-uniform weights and zero bias
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: ActivationType,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (input_size + output_size) as f64).sqrt();
        let weights = Array2::random_using(
            (input_size, output_size),
            Uniform::new(-limit, limit),
            rng,
        );
        let biases = Array1::zeros(output_size);

        Self {
            weights,
            biases,
            activation_type: activation,
            input_size,
            output_size,
            last_input: None,
            last_z: None,
        }
    }

    /// Forward pass, caching what `backward` needs
    pub fn forward(&mut self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let z = self.linear(input)?;
        let output = create_activation(self.activation_type).forward_batch(&z);

        self.last_input = Some(input.clone());
        self.last_z = Some(z);
        Ok(output)
    }

    /// Forward pass without caching
    pub fn predict(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let z = self.linear(input)?;
        Ok(create_activation(self.activation_type).forward_batch(&z))
    }

    fn linear(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        if input.ncols() != self.input_size {
            return Err(Error::ShapeError(format!(
                "dense layer expects {} inputs, got {}",
                self.input_size,
                input.ncols()
            )));
        }
        Ok(input.dot(&self.weights) + &self.biases)
    }

    /// Backward pass for the most recent `forward`.
    /// Returns: (input_gradient, parameter gradients)
    pub fn backward(&self, output_gradient: &Array2<f64>) -> Result<(Array2<f64>, DenseGradients)> {
        let (input, z) = match (&self.last_input, &self.last_z) {
            (Some(input), Some(z)) => (input, z),
            _ => {
                return Err(Error::ModelError(
                    "backward called before forward".to_string(),
                ))
            }
        };
        if output_gradient.dim() != z.dim() {
            return Err(Error::ShapeError(format!(
                "output gradient {:?} does not match layer output {:?}",
                output_gradient.dim(),
                z.dim()
            )));
        }

        let activation_grad = create_activation(self.activation_type).backward_batch(z);
        let delta = output_gradient * &activation_grad;

        let gradients = DenseGradients {
            weights: input.t().dot(&delta),
            biases: delta.sum_axis(Axis(0)),
        };
        let input_gradient = delta.dot(&self.weights.t());

        Ok((input_gradient, gradients))
    }

    /// Drop cached activations
    pub fn clear_cache(&mut self) {
        self.last_input = None;
        self.last_z = None;
    }

    /// Get number of parameters
    pub fn num_parameters(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

impl Clone for DenseLayer {
    fn clone(&self) -> Self {
        Self {
            weights: self.weights.clone(),
            biases: self.biases.clone(),
            activation_type: self.activation_type,
            input_size: self.input_size,
            output_size: self.output_size,
            last_input: None,
            last_z: None,
        }
    }
}

impl std::fmt::Debug for DenseLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenseLayer")
            .field("input_size", &self.input_size)
            .field("output_size", &self.output_size)
            .field("activation", &self.activation_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layer(activation: ActivationType) -> DenseLayer {
        DenseLayer::new(4, 3, activation, &mut StdRng::seed_from_u64(42))
    }

    #[test]
    fn test_layer_creation() {
        let layer = layer(ActivationType::Linear);
        assert_eq!(layer.weights.dim(), (4, 3));
        assert_eq!(layer.biases.len(), 3);
        assert_eq!(layer.num_parameters(), 4 * 3 + 3);

        let limit = (6.0f64 / 7.0).sqrt();
        assert!(layer.weights.iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_forward_pass() {
        let mut layer = layer(ActivationType::ShiftedSoftplus);
        let input = Array2::ones((2, 4));
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.dim(), (2, 3));
        assert_eq!(output, layer.predict(&input).unwrap());
    }

    #[test]
    fn test_wrong_input_width() {
        let mut layer = layer(ActivationType::Linear);
        assert!(layer.forward(&Array2::ones((2, 5))).is_err());
    }

    #[test]
    fn test_backward_before_forward() {
        let layer = layer(ActivationType::Linear);
        let err = layer.backward(&Array2::ones((1, 3))).unwrap_err();
        assert!(matches!(err, Error::ModelError(_)));
    }

    #[test]
    fn test_weight_gradient_matches_finite_difference() {
        let mut layer = layer(ActivationType::ShiftedSoftplus);
        let input = Array2::from_shape_fn((2, 4), |(i, j)| 0.3 * i as f64 - 0.2 * j as f64);

        // loss = sum(output)
        layer.forward(&input).unwrap();
        let (_, grads) = layer.backward(&Array2::ones((2, 3))).unwrap();

        let h = 1e-6;
        let mut probe = layer.clone();
        probe.weights[[1, 2]] += h;
        let plus = probe.predict(&input).unwrap().sum();
        probe.weights[[1, 2]] -= 2.0 * h;
        let minus = probe.predict(&input).unwrap().sum();

        assert_relative_eq!(grads.weights[[1, 2]], (plus - minus) / (2.0 * h), epsilon = 1e-6);
    }
}
