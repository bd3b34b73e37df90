//! Training loop for SchNet
//!
//! One graph is one batch element. Gradients of `batch_size` consecutive
//! graphs are averaged before each optimizer step.

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::metrics::{EpochMetrics, History};
use crate::error::{Error, Result};
use crate::graph::LabeledGraph;
use crate::nn::{argmax, create_optimizer, sparse_categorical_cross_entropy, OptimizerType};
use crate::schnet::SchNetModel;
use crate::{DEFAULT_EPOCHS, DEFAULT_LEARNING_RATE};

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of epochs
    pub epochs: usize,
    /// Learning rate
    pub learning_rate: f64,
    /// Graphs per optimizer step
    pub batch_size: usize,
    /// Optimizer
    pub optimizer: OptimizerType,
    /// Reshuffle the training graphs every epoch
    pub shuffle: bool,
    /// Seed for the per-epoch shuffle
    pub seed: u64,
    /// Path to save the model with the best validation accuracy
    pub checkpoint_path: Option<String>,
    /// Draw a progress bar per epoch
    pub show_progress: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
            batch_size: 1,
            optimizer: OptimizerType::Adam,
            shuffle: false,
            seed: 0,
            checkpoint_path: None,
            show_progress: true,
        }
    }
}

/// Trainer for SchNet models
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Train `model` on `train`, scoring `val` after every epoch
    pub fn fit(
        &self,
        model: &mut SchNetModel,
        train: &[LabeledGraph],
        val: &[LabeledGraph],
    ) -> Result<History> {
        if train.is_empty() {
            return Err(Error::InsufficientData("no training graphs".to_string()));
        }
        if self.config.batch_size == 0 {
            return Err(Error::ConfigError("batch_size must be positive".to_string()));
        }
        if val.is_empty() {
            warn!("No validation graphs, validation metrics will be skipped");
        }

        model.set_optimizer(create_optimizer(
            self.config.optimizer,
            self.config.learning_rate,
        ));
        info!(
            "Training on {} graphs for {} epochs (lr {}, batch size {})",
            train.len(),
            self.config.epochs,
            self.config.learning_rate,
            self.config.batch_size
        );

        let mut history = History::new();
        let mut best_val_accuracy: Option<f64> = None;
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..self.config.epochs {
            if self.config.shuffle {
                let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
                order.shuffle(&mut rng);
            }

            let mut metrics = EpochMetrics::new(epoch + 1);
            let (loss, accuracy) = self.train_epoch(model, train, &order, epoch)?;
            metrics.train_loss = loss;
            metrics.train_accuracy = accuracy;

            if !val.is_empty() {
                let (val_loss, val_accuracy) = self.evaluate(model, val)?;
                metrics.val_loss = Some(val_loss);
                metrics.val_accuracy = Some(val_accuracy);
            }

            if metrics.improved_over(best_val_accuracy) {
                best_val_accuracy = metrics.val_accuracy;
                if let Some(ref path) = self.config.checkpoint_path {
                    model.save(path)?;
                    debug!("Saved best model to {}", path);
                }
            }

            info!("{}", metrics);
            history.push(metrics);
        }

        model.clear_cache();
        if let Some(best) = history.best_epoch() {
            info!(
                "Best validation accuracy: {:.4} (epoch {})",
                best.val_accuracy.unwrap_or_default(),
                best.epoch
            );
        }
        Ok(history)
    }

    /// Train for one epoch, returning mean loss and accuracy
    fn train_epoch(
        &self,
        model: &mut SchNetModel,
        train: &[LabeledGraph],
        order: &[usize],
        epoch: usize,
    ) -> Result<(f64, f64)> {
        let pb = self.progress_bar(order.len(), epoch);
        let mut total_loss = 0.0;
        let mut correct = 0usize;

        for batch in order.chunks(self.config.batch_size) {
            let mut gradients = model.zero_gradients();
            for &idx in batch {
                let sample = &train[idx];
                let logits = model.forward(&sample.graph)?;
                total_loss += sparse_categorical_cross_entropy(&logits, sample.label)?;
                if argmax(&logits) == sample.label {
                    correct += 1;
                }
                gradients.add(&model.backward(sample.label)?);
                pb.inc(1);
            }
            gradients.scale(1.0 / batch.len() as f64);
            model.apply_gradients(&gradients)?;
        }

        let n = order.len() as f64;
        pb.finish_and_clear();
        Ok((total_loss / n, correct as f64 / n))
    }

    fn progress_bar(&self, len: usize, epoch: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_prefix(format!("Epoch {}/{}", epoch + 1, self.config.epochs));
        pb
    }

    /// Mean loss and accuracy over `graphs`
    pub fn evaluate(&self, model: &SchNetModel, graphs: &[LabeledGraph]) -> Result<(f64, f64)> {
        evaluate(model, graphs)
    }
}

/// Mean cross-entropy loss and accuracy of `model` on `graphs`
pub fn evaluate(model: &SchNetModel, graphs: &[LabeledGraph]) -> Result<(f64, f64)> {
    if graphs.is_empty() {
        return Err(Error::InsufficientData("no graphs to evaluate".to_string()));
    }
    let scores = graphs
        .par_iter()
        .map(|g| -> Result<(f64, bool)> {
            let logits = model.predict_logits(&g.graph)?;
            let loss = sparse_categorical_cross_entropy(&logits, g.label)?;
            Ok((loss, argmax(&logits) == g.label))
        })
        .collect::<Result<Vec<_>>>()?;

    let n = scores.len() as f64;
    let loss = scores.iter().map(|(l, _)| l).sum::<f64>() / n;
    let accuracy = scores.iter().filter(|(_, ok)| *ok).count() as f64 / n;
    Ok((loss, accuracy))
}

/// Predicted class for every graph, in order
pub fn predict_labels(model: &SchNetModel, graphs: &[LabeledGraph]) -> Result<Vec<usize>> {
    graphs
        .par_iter()
        .map(|g| model.predict_class(&g.graph))
        .collect()
}
