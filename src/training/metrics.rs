//! Per-epoch training metrics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::Result;

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean training loss over the epoch
    pub train_loss: f64,
    /// Fraction of training graphs classified correctly during the epoch
    pub train_accuracy: f64,
    /// Validation loss, if a validation set was given
    pub val_loss: Option<f64>,
    /// Validation accuracy, if a validation set was given
    pub val_accuracy: Option<f64>,
}

impl EpochMetrics {
    pub fn new(epoch: usize) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    /// True when validation accuracy beat `best`
    pub fn improved_over(&self, best: Option<f64>) -> bool {
        match (self.val_accuracy, best) {
            (Some(acc), Some(best)) => acc > best,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Epoch {} - loss: {:.4} - accuracy: {:.4}",
            self.epoch, self.train_loss, self.train_accuracy
        )?;
        if let (Some(loss), Some(acc)) = (self.val_loss, self.val_accuracy) {
            write!(f, " - val_loss: {:.4} - val_accuracy: {:.4}", loss, acc)?;
        }
        Ok(())
    }
}

/// Training history, one entry per completed epoch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn train_loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|m| m.train_loss).collect()
    }

    pub fn train_accuracy(&self) -> Vec<f64> {
        self.epochs.iter().map(|m| m.train_accuracy).collect()
    }

    /// Validation accuracy for epochs that recorded one
    pub fn val_accuracy(&self) -> Vec<f64> {
        self.epochs.iter().filter_map(|m| m.val_accuracy).collect()
    }

    /// Epoch with the highest validation accuracy
    pub fn best_epoch(&self) -> Option<&EpochMetrics> {
        self.epochs
            .iter()
            .filter(|m| m.val_accuracy.is_some())
            .fold(None, |best: Option<&EpochMetrics>, m| match best {
                Some(b) if !m.improved_over(b.val_accuracy) => Some(b),
                _ => Some(m),
            })
    }

    /// Save history as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Load history from JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
