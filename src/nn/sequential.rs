//! A stack of dense layers applied in order.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::ActivationType;
use super::layer::{DenseGradients, DenseLayer};
use crate::error::Result;

/// Dense layers chained output to input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequential {
    pub layers: Vec<DenseLayer>,
}

impl Sequential {
    /// Build from `(units, activation)` pairs starting at `input_size`
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        layout: &[(usize, ActivationType)],
        rng: &mut R,
    ) -> Self {
        let mut layers = Vec::with_capacity(layout.len());
        let mut prev = input_size;
        for &(units, activation) in layout {
            layers.push(DenseLayer::new(prev, units, activation, rng));
            prev = units;
        }
        Self { layers }
    }

    pub fn forward(&mut self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let mut x = input.clone();
        for layer in &mut self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    pub fn predict(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.predict(&x)?;
        }
        Ok(x)
    }

    /// Backpropagate through all layers.
    /// Returns the input gradient and per-layer gradients in layer order.
    pub fn backward(
        &self,
        output_gradient: &Array2<f64>,
    ) -> Result<(Array2<f64>, Vec<DenseGradients>)> {
        let mut grad = output_gradient.clone();
        let mut grads = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter().rev() {
            let (input_grad, layer_grads) = layer.backward(&grad)?;
            grads.push(layer_grads);
            grad = input_grad;
        }
        grads.reverse();
        Ok((grad, grads))
    }

    pub fn zero_gradients(&self) -> Vec<DenseGradients> {
        self.layers
            .iter()
            .map(|l| DenseGradients::zeros(l.input_size, l.output_size))
            .collect()
    }

    pub fn clear_cache(&mut self) {
        for layer in &mut self.layers {
            layer.clear_cache();
        }
    }

    pub fn output_size(&self) -> Option<usize> {
        self.layers.last().map(|l| l.output_size)
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }
}
