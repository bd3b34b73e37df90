//! Neural Network Building Blocks
//!
//! Just enough of a network library for SchNet, with gradients derived by hand:
//! - Dense layers with cached forward passes
//! - Embedding lookup
//! - Shifted softplus and linear activations
//! - SGD and Adam optimizers
//! - Sparse categorical cross-entropy

pub mod activation;
mod embedding;
mod layer;
pub mod loss;
mod optimizer;
mod sequential;

pub use activation::{create_activation, ssp, Activation, ActivationType};
pub use embedding::Embedding;
pub use layer::{DenseGradients, DenseLayer};
pub use loss::{argmax, softmax, sparse_categorical_cross_entropy, sparse_categorical_cross_entropy_gradient};
pub use optimizer::{create_optimizer, Adam, Optimizer, OptimizerType, SGD};
pub use sequential::Sequential;
