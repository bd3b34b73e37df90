//! Radial basis expansion of edge distances.
//!
//! A scalar distance `d` becomes the vector
//! `e_k = exp(-gamma * (d - mu_k)^2)` over evenly spaced centers `mu_k`.

use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

/// Gaussian radial basis with evenly spaced centers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbfExpansion {
    /// Centers `mu_k`, from 0 to `max_r` inclusive
    pub centers: Array1<f64>,
    /// Width parameter
    pub gamma: f64,
}

impl RbfExpansion {
    /// `num_features` centers spanning `[0, max_r]`
    pub fn new(num_features: usize, max_r: f64, gamma: f64) -> Self {
        Self {
            centers: Array1::linspace(0.0, max_r, num_features),
            gamma,
        }
    }

    /// Number of features per distance
    pub fn num_features(&self) -> usize {
        self.centers.len()
    }

    /// Expand a single distance
    pub fn expand_scalar(&self, r: f64) -> Array1<f64> {
        self.centers
            .mapv(|mu| (-self.gamma * (r - mu).powi(2)).exp())
    }

    /// Expand a `[M, K]` distance array into `[M, K, F]`
    pub fn expand(&self, distances: &Array2<f64>) -> Array3<f64> {
        let (m, k) = distances.dim();
        let f = self.num_features();

        Array3::from_shape_fn((m, k, f), |(i, j, c)| {
            let diff = distances[[i, j]] - self.centers[c];
            (-self.gamma * diff * diff).exp()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_centers_include_endpoints() {
        let rbf = RbfExpansion::new(8, 20.0, 1.0);
        assert_eq!(rbf.num_features(), 8);
        assert_relative_eq!(rbf.centers[0], 0.0);
        assert_relative_eq!(rbf.centers[7], 20.0, epsilon = 1e-9);
        assert_relative_eq!(rbf.centers[1], 20.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_peak_at_center() {
        let rbf = RbfExpansion::new(8, 20.0, 1.0);
        let e = rbf.expand_scalar(0.0);
        assert_relative_eq!(e[0], 1.0);
        assert!(e[1] < 1e-3);
    }

    #[test]
    fn test_expand_shape_and_values() {
        let rbf = RbfExpansion::new(3, 2.0, 0.5);
        let d = array![[0.0, 1.0], [2.0, 1000.0]];
        let e = rbf.expand(&d);

        assert_eq!(e.dim(), (2, 2, 3));
        assert_relative_eq!(e[[0, 1, 1]], 1.0);
        assert_relative_eq!(e[[0, 1, 0]], (-0.5f64).exp(), epsilon = 1e-12);
        // masked distances expand to zeros
        assert!(e[[1, 1, 2]] < 1e-12);
    }
}
