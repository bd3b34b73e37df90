//! Lookup table mapping integer node types to feature vectors.

use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Range of the uniform initializer
const INIT_LIMIT: f64 = 0.05;

/// Trainable embedding table `[vocab_size, dim]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub table: Array2<f64>,
}

impl Embedding {
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, dim: usize, rng: &mut R) -> Self {
        Self {
            table: Array2::random_using(
                (vocab_size, dim),
                Uniform::new(-INIT_LIMIT, INIT_LIMIT),
                rng,
            ),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.table.nrows()
    }

    pub fn dim(&self) -> usize {
        self.table.ncols()
    }

    /// Gather one row per id
    pub fn forward(&self, ids: &[usize]) -> Result<Array2<f64>> {
        if let Some(&bad) = ids.iter().find(|&&id| id >= self.vocab_size()) {
            return Err(Error::ShapeError(format!(
                "node type {} outside embedding vocabulary of {}",
                bad,
                self.vocab_size()
            )));
        }
        Ok(self.table.select(Axis(0), ids))
    }

    /// Scatter-add row gradients back onto the table
    pub fn backward(&self, ids: &[usize], output_gradient: &Array2<f64>) -> Result<Array2<f64>> {
        if output_gradient.dim() != (ids.len(), self.dim()) {
            return Err(Error::ShapeError(format!(
                "embedding gradient {:?} does not match {} ids of width {}",
                output_gradient.dim(),
                ids.len(),
                self.dim()
            )));
        }
        let mut grad: Array2<f64> = Array2::zeros(self.table.dim());
        for (row, &id) in output_gradient.outer_iter().zip(ids) {
            let mut target = grad.row_mut(id);
            target += &row;
        }
        Ok(grad)
    }

    pub fn num_parameters(&self) -> usize {
        self.table.len()
    }
}
