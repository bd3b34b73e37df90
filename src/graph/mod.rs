//! Graph Module
//!
//! Converts point clouds into fixed-degree neighbor graphs:
//! - k-nearest-neighbor search over the full distance matrix
//! - Gaussian radial basis expansion of the neighbor distances
//! - Per-sample graph assembly (node types, edge features, edge indices)

mod builder;
mod knn;
mod rbf;

pub use builder::{GraphBuilder, GraphConfig, LabeledGraph, SampleGraph, DEFAULT_NODE_TYPE};
pub use knn::{get_edges, masked_distance_matrix, MASKED_DISTANCE, SELF_DISTANCE_CUTOFF};
pub use rbf::RbfExpansion;
