//! SchNet Module
//!
//! Continuous-filter convolutional network over point-cloud graphs,
//! trained with hand-derived gradients.

mod block;
mod config;
mod model;

pub use block::{BlockGradients, InteractionBlock};
pub use config::SchNetConfig;
pub use model::{SchNetGradients, SchNetModel};
