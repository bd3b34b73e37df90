//! Per-sample graph construction
//!
//! Turns a point cloud into the three model inputs: node types, RBF edge
//! features and neighbor indices.

use ndarray::{Array2, Array3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::knn::get_edges;
use super::rbf::RbfExpansion;
use crate::data::Sample;
use crate::error::{Error, Result};

/// Node type assigned to every point
pub const DEFAULT_NODE_TYPE: usize = 1;

/// Graph construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Neighbors per node
    pub max_degree: usize,
    /// RBF features per edge
    pub edge_features: usize,
    /// Largest RBF center
    pub max_r: f64,
    /// RBF width
    pub gamma: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_degree: 16,
            edge_features: 8,
            max_r: 20.0,
            gamma: 1.0,
        }
    }
}

/// Model inputs for one point cloud
#[derive(Debug, Clone)]
pub struct SampleGraph {
    /// Node type per atom `[M]`
    pub nodes: Vec<usize>,
    /// RBF-expanded neighbor distances `[M, K, F]`
    pub edge_features: Array3<f64>,
    /// Neighbor indices `[M, K]`
    pub edge_index: Array2<usize>,
}

impl SampleGraph {
    /// Check that the three inputs agree with each other
    pub fn validate(&self) -> Result<()> {
        let m = self.nodes.len();
        let (fm, fk, _) = self.edge_features.dim();
        let (im, ik) = self.edge_index.dim();

        if fm != m || im != m || fk != ik {
            return Err(Error::ShapeError(format!(
                "graph with {} nodes has edge features {:?} and edge index {:?}",
                m,
                self.edge_features.shape(),
                self.edge_index.shape()
            )));
        }
        if let Some(&bad) = self.edge_index.iter().find(|&&j| j >= m) {
            return Err(Error::ShapeError(format!(
                "edge index {} out of range for {} nodes",
                bad, m
            )));
        }
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Neighbors per node
    pub fn degree(&self) -> usize {
        self.edge_index.ncols()
    }

    pub fn num_edge_features(&self) -> usize {
        self.edge_features.dim().2
    }
}

/// A graph paired with its class label
#[derive(Debug, Clone)]
pub struct LabeledGraph {
    pub graph: SampleGraph,
    pub label: usize,
}

/// Builds [`SampleGraph`]s from samples
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    max_degree: usize,
    rbf: RbfExpansion,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::from_config(&GraphConfig::default())
    }
}

impl GraphBuilder {
    pub fn new(max_degree: usize, rbf: RbfExpansion) -> Self {
        Self { max_degree, rbf }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(
            config.max_degree,
            RbfExpansion::new(config.edge_features, config.max_r, config.gamma),
        )
    }

    /// Build the graph of one point cloud
    pub fn build_positions(&self, positions: &Array2<f64>) -> SampleGraph {
        let (distances, edge_index) = get_edges(positions, self.max_degree, true);
        SampleGraph {
            nodes: vec![DEFAULT_NODE_TYPE; positions.nrows()],
            edge_features: self.rbf.expand(&distances),
            edge_index,
        }
    }

    /// Build the graph of a sample and keep its label
    pub fn build(&self, sample: &Sample) -> LabeledGraph {
        LabeledGraph {
            graph: self.build_positions(&sample.positions),
            label: sample.label,
        }
    }

    /// Build graphs for many samples in parallel, keeping their order
    pub fn build_all(&self, samples: &[Sample]) -> Vec<LabeledGraph> {
        let graphs: Vec<LabeledGraph> = samples.par_iter().map(|s| self.build(s)).collect();
        debug!("Built {} graphs", graphs.len());
        graphs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn grid(n: usize) -> Array2<f64> {
        Array2::from_shape_fn((n * n, 2), |(i, c)| if c == 0 { (i % n) as f64 } else { (i / n) as f64 })
    }

    #[test]
    fn test_build_shapes() {
        let builder = GraphBuilder::default();
        let g = builder.build_positions(&grid(5));

        assert_eq!(g.num_nodes(), 25);
        assert_eq!(g.degree(), 16);
        assert_eq!(g.num_edge_features(), 8);
        assert!(g.nodes.iter().all(|&t| t == DEFAULT_NODE_TYPE));
        g.validate().unwrap();
    }

    #[test]
    fn test_small_cloud_degree() {
        let builder = GraphBuilder::default();
        let g = builder.build_positions(&grid(2));
        assert_eq!(g.degree(), 4);
        g.validate().unwrap();
    }

    #[test]
    fn test_build_all_keeps_order() {
        let builder = GraphBuilder::default();
        let samples: Vec<Sample> = (0..6).map(|i| Sample::new(grid(3), i)).collect();
        let graphs = builder.build_all(&samples);
        let labels: Vec<usize> = graphs.iter().map(|g| g.label).collect();
        assert_eq!(labels, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_validate_rejects_bad_index() {
        let builder = GraphBuilder::default();
        let mut g = builder.build_positions(&grid(3));
        g.edge_index[[0, 0]] = 99;
        assert!(g.validate().is_err());
    }
}
