//! Configuration handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{SplitConfig, DEFAULT_ARCHIVE_PATH, DEFAULT_DATASET_URL};
use crate::error::Result;
use crate::graph::GraphConfig;
use crate::plot::PlotConfig;
use crate::schnet::SchNetConfig;
use crate::training::TrainingConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dataset location and split
    pub data: DataConfig,
    /// Graph construction
    pub graph: GraphConfig,
    /// Model architecture
    pub model: SchNetConfig,
    /// Training loop
    pub training: TrainingConfig,
    /// Figures
    pub plot: PlotConfig,
}

impl Config {
    /// Load configuration from TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Keep the model input width in line with the graph features
    pub fn sync_model(&mut self) {
        self.model.edge_features = self.graph.edge_features;
    }
}

/// Dataset and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Archive download URL
    pub url: String,
    /// Local path of the cached archive
    pub archive_path: String,
    /// Directory for the saved model and history
    pub output_dir: String,
    /// Shuffle and split parameters
    pub split: SplitConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATASET_URL.to_string(),
            archive_path: DEFAULT_ARCHIVE_PATH.to_string(),
            output_dir: "output".to_string(),
            split: SplitConfig::default(),
        }
    }
}

impl DataConfig {
    pub fn model_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join("schnet_model.json")
    }

    pub fn history_path(&self) -> PathBuf {
        Path::new(&self.output_dir).join("history.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.graph.max_degree, 16);
        assert_eq!(config.model.channels, 30);
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.data.split.val_size, 100);
        assert_eq!(config.plot.neighbor_stride, 23);
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [graph]
            max_degree = 8

            [training]
            epochs = 3
            checkpoint_path = "best.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.graph.max_degree, 8);
        assert_eq!(config.graph.edge_features, 8);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.checkpoint_path.as_deref(), Some("best.json"));
        assert_eq!(config.data.url, DEFAULT_DATASET_URL);
    }

    #[test]
    fn test_round_trip_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.graph.edge_features = 12;
        config.sync_model();
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.model.edge_features, 12);
        assert_eq!(loaded.data.model_path(), Path::new("output").join("schnet_model.json"));
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[graph]\nmax_degree = \"many\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
