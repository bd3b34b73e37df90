//! SchNet Configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the SchNet model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchNetConfig {
    /// Number of interaction blocks
    pub gnn_blocks: usize,

    /// Node feature width
    pub channels: usize,

    /// Number of output classes
    pub label_dim: usize,

    /// Number of distinct node types
    pub vocab: usize,

    /// RBF features per edge
    pub edge_features: usize,

    /// Seed for weight initialization
    pub seed: u64,
}

impl Default for SchNetConfig {
    fn default() -> Self {
        Self {
            gnn_blocks: 3,
            channels: 30,
            label_dim: 2,
            vocab: 2,
            edge_features: 8,
            seed: 0,
        }
    }
}

impl SchNetConfig {
    /// Create a new configuration
    pub fn new(gnn_blocks: usize, channels: usize, label_dim: usize) -> Self {
        Self {
            gnn_blocks,
            channels,
            label_dim,
            ..Default::default()
        }
    }

    /// Set number of output classes
    pub fn with_label_dim(mut self, label_dim: usize) -> Self {
        self.label_dim = label_dim;
        self
    }

    /// Set RBF feature count
    pub fn with_edge_features(mut self, edge_features: usize) -> Self {
        self.edge_features = edge_features;
        self
    }

    /// Set initialization seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Width of the hidden readout layer
    pub fn readout_channels(&self) -> usize {
        self.channels / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels < 2 {
            return Err(Error::ConfigError(format!(
                "channels must be at least 2, got {}",
                self.channels
            )));
        }
        if self.label_dim == 0 {
            return Err(Error::ConfigError("label_dim must be positive".to_string()));
        }
        if self.vocab == 0 || self.edge_features == 0 {
            return Err(Error::ConfigError(
                "vocab and edge_features must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchNetConfig::default();
        assert_eq!(config.gnn_blocks, 3);
        assert_eq!(config.channels, 30);
        assert_eq!(config.readout_channels(), 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SchNetConfig::new(2, 16, 5).with_edge_features(4).with_seed(9);
        assert_eq!(config.label_dim, 5);
        assert_eq!(config.edge_features, 4);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn test_validate() {
        assert!(SchNetConfig::new(3, 1, 4).validate().is_err());
        assert!(SchNetConfig::new(3, 8, 0).validate().is_err());
    }
}
