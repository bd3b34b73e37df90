//! # SchNet for 2-D Symmetry Groups
//!
//! This library trains a SchNet graph neural network to recognise the
//! symmetry group of a two-dimensional point cloud from its coordinates.
//!
//! ## Features
//!
//! - Download and decoding of the published trajectory archive
//! - k-nearest-neighbor graphs with radial basis edge features
//! - SchNet model with hand-derived gradients and Adam training
//! - SVG figures of samples, neighbors, accuracy and predictions
//!
//! ## Example
//!
//! ```rust,no_run
//! use schnet_symmetry::{
//!     data::{DatasetSplit, SplitConfig, TrajectorySet},
//!     graph::GraphBuilder,
//!     schnet::{SchNetConfig, SchNetModel},
//!     training::{Trainer, TrainingConfig},
//! };
//!
//! fn main() -> schnet_symmetry::Result<()> {
//!     let trajectories = TrajectorySet::load("data/sym_trajs.pb.gz")?;
//!     let labels = trajectories.label_names();
//!     let split = DatasetSplit::shuffle_and_split(trajectories.samples(), &SplitConfig::default())?;
//!
//!     let builder = GraphBuilder::default();
//!     let train = builder.build_all(&split.train);
//!     let val = builder.build_all(&split.val);
//!
//!     let mut model = SchNetModel::new(SchNetConfig::default().with_label_dim(labels.len()))?;
//!     let history = Trainer::new(TrainingConfig::default()).fit(&mut model, &train, &val)?;
//!     println!("{:?}", history.last());
//!     Ok(())
//! }
//! ```

pub mod data;
pub mod error;
pub mod graph;
pub mod nn;
pub mod plot;
pub mod schnet;
pub mod training;
pub mod utils;

// Re-export main types
pub use data::{DatasetClient, DatasetSplit, Sample, TrajectorySet};
pub use error::{Error, Result};
pub use graph::{GraphBuilder, LabeledGraph, SampleGraph};
pub use schnet::{SchNetConfig, SchNetModel};
pub use training::{History, Trainer, TrainingConfig};
pub use utils::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 20;

/// Default Adam learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_defaults_agree() {
        let config = Config::default();
        assert_eq!(config.training.epochs, DEFAULT_EPOCHS);
        assert_eq!(config.training.learning_rate, DEFAULT_LEARNING_RATE);
        assert_eq!(config.model.edge_features, config.graph.edge_features);
    }
}
