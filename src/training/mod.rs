//! Training Module
//!
//! Epoch loop, evaluation and recorded metrics.

mod metrics;
mod trainer;

pub use metrics::{EpochMetrics, History};
pub use trainer::{evaluate, predict_labels, Trainer, TrainingConfig};
