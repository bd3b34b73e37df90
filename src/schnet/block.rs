//! SchNet interaction block
//!
//! Continuous-filter convolution over a fixed-degree neighbor list:
//!
//! ```text
//! v   = h[edge_index]              [M*K, C]
//! e   = h1(v) * h2(edge_features)  [M*K, C]
//! e_i = sum over the K neighbors   [M, C]
//! h'  = h + h3(e_i)
//! ```
//!
//! Edge features pass through unchanged.

use ndarray::{s, Array2, Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::nn::{ActivationType, DenseGradients, Sequential};

/// Gradients for one interaction block
#[derive(Debug, Clone)]
pub struct BlockGradients {
    pub h1: Vec<DenseGradients>,
    pub h2: Vec<DenseGradients>,
    pub h3: Vec<DenseGradients>,
}

impl BlockGradients {
    pub fn add(&mut self, other: &BlockGradients) {
        for (a, b) in self
            .h1
            .iter_mut()
            .chain(self.h2.iter_mut())
            .chain(self.h3.iter_mut())
            .zip(other.h1.iter().chain(other.h2.iter()).chain(other.h3.iter()))
        {
            a.add(b);
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for g in self
            .h1
            .iter_mut()
            .chain(self.h2.iter_mut())
            .chain(self.h3.iter_mut())
        {
            g.scale(factor);
        }
    }
}

struct BlockCache {
    edges: Vec<usize>,
    num_nodes: usize,
    degree: usize,
    a: Array2<f64>,
    b: Array2<f64>,
}

#[derive(Serialize, Deserialize)]
pub struct InteractionBlock {
    /// Neighbor feature transform
    pub(crate) h1: Sequential,
    /// Filter network on edge features
    pub(crate) h2: Sequential,
    /// Update network on aggregated messages
    pub(crate) h3: Sequential,
    #[serde(skip)]
    cache: Option<BlockCache>,
}

impl InteractionBlock {
    pub fn new<R: Rng + ?Sized>(channels: usize, edge_features: usize, rng: &mut R) -> Self {
        use ActivationType::{Linear, ShiftedSoftplus};

        Self {
            h1: Sequential::new(channels, &[(channels, Linear)], rng),
            h2: Sequential::new(
                edge_features,
                &[(channels, ShiftedSoftplus), (channels, ShiftedSoftplus)],
                rng,
            ),
            h3: Sequential::new(
                channels,
                &[(channels, ShiftedSoftplus), (channels, Linear)],
                rng,
            ),
            cache: None,
        }
    }

    /// Training forward pass; caches what `backward` needs
    pub fn forward(
        &mut self,
        h: &Array2<f64>,
        edge_features: &Array3<f64>,
        edge_index: &Array2<usize>,
    ) -> Result<Array2<f64>> {
        let (edges, d) = flatten_edges(h, edge_features, edge_index)?;
        let (num_nodes, degree) = edge_index.dim();

        let v = h.select(Axis(0), &edges);
        let a = self.h1.forward(&v)?;
        let b = self.h2.forward(&d)?;
        let e_i = aggregate(&(&a * &b), num_nodes, degree);
        let u = self.h3.forward(&e_i)?;

        self.cache = Some(BlockCache {
            edges,
            num_nodes,
            degree,
            a,
            b,
        });
        Ok(h + &u)
    }

    /// Inference forward pass
    pub fn predict(
        &self,
        h: &Array2<f64>,
        edge_features: &Array3<f64>,
        edge_index: &Array2<usize>,
    ) -> Result<Array2<f64>> {
        let (edges, d) = flatten_edges(h, edge_features, edge_index)?;
        let (num_nodes, degree) = edge_index.dim();

        let v = h.select(Axis(0), &edges);
        let a = self.h1.predict(&v)?;
        let b = self.h2.predict(&d)?;
        let e_i = aggregate(&(&a * &b), num_nodes, degree);
        let u = self.h3.predict(&e_i)?;
        Ok(h + &u)
    }

    /// Backward pass for the most recent `forward`.
    /// Returns the gradient with respect to the block input `h`.
    pub fn backward(&self, output_gradient: &Array2<f64>) -> Result<(Array2<f64>, BlockGradients)> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| Error::ModelError("block backward called before forward".to_string()))?;
        let k = cache.degree;

        let (de_i, h3) = self.h3.backward(output_gradient)?;

        // every neighbor message feeds its node's sum
        let de = Array2::from_shape_fn(cache.a.dim(), |(r, c)| de_i[[r / k, c]]);
        let da = &de * &cache.b;
        let db = &de * &cache.a;

        let (_, h2) = self.h2.backward(&db)?;
        let (dv, h1) = self.h1.backward(&da)?;

        // residual path plus scatter of the gathered rows
        let mut input_gradient = output_gradient.clone();
        for (row, &j) in dv.outer_iter().zip(&cache.edges) {
            let mut target = input_gradient.row_mut(j);
            target += &row;
        }
        debug_assert_eq!(input_gradient.nrows(), cache.num_nodes);

        Ok((input_gradient, BlockGradients { h1, h2, h3 }))
    }

    pub fn zero_gradients(&self) -> BlockGradients {
        BlockGradients {
            h1: self.h1.zero_gradients(),
            h2: self.h2.zero_gradients(),
            h3: self.h3.zero_gradients(),
        }
    }

    /// Sub-networks in parameter order
    pub(crate) fn networks_mut(&mut self) -> [&mut Sequential; 3] {
        [&mut self.h1, &mut self.h2, &mut self.h3]
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
        for net in self.networks_mut() {
            net.clear_cache();
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.h1.num_parameters() + self.h2.num_parameters() + self.h3.num_parameters()
    }
}

impl Clone for InteractionBlock {
    fn clone(&self) -> Self {
        Self {
            h1: self.h1.clone(),
            h2: self.h2.clone(),
            h3: self.h3.clone(),
            cache: None,
        }
    }
}

impl std::fmt::Debug for InteractionBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionBlock")
            .field("h1", &self.h1)
            .field("h2", &self.h2)
            .field("h3", &self.h3)
            .finish()
    }
}

/// Flatten the neighbor list to `[M*K]` and edge features to `[M*K, F]`
fn flatten_edges(
    h: &Array2<f64>,
    edge_features: &Array3<f64>,
    edge_index: &Array2<usize>,
) -> Result<(Vec<usize>, Array2<f64>)> {
    let (m, k) = edge_index.dim();
    let (fm, fk, f) = edge_features.dim();
    if h.nrows() != m || fm != m || fk != k {
        return Err(Error::ShapeError(format!(
            "node features {:?}, edge features {:?} and edge index {:?} disagree",
            h.dim(),
            edge_features.dim(),
            edge_index.dim()
        )));
    }

    let edges: Vec<usize> = edge_index.iter().copied().collect();
    if let Some(&bad) = edges.iter().find(|&&j| j >= m) {
        return Err(Error::ShapeError(format!(
            "edge index {} out of range for {} nodes",
            bad, m
        )));
    }
    let d = Array2::from_shape_vec((m * k, f), edge_features.iter().copied().collect())?;
    Ok((edges, d))
}

/// Sum each node's K consecutive message rows
fn aggregate(messages: &Array2<f64>, num_nodes: usize, degree: usize) -> Array2<f64> {
    let mut out: Array2<f64> = Array2::zeros((num_nodes, messages.ncols()));
    for i in 0..num_nodes {
        let rows = messages.slice(s![i * degree..(i + 1) * degree, ..]);
        out.row_mut(i).assign(&rows.sum_axis(Axis(0)));
    }
    out
}
