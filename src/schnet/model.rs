//! SchNet Model
//!
//! Embedding, a stack of interaction blocks and a per-node readout whose
//! outputs are averaged over nodes into class logits.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::block::{BlockGradients, InteractionBlock};
use super::config::SchNetConfig;
use crate::error::{Error, Result};
use crate::graph::SampleGraph;
use crate::nn::{
    argmax, softmax, sparse_categorical_cross_entropy_gradient, ActivationType, Adam,
    DenseGradients, DenseLayer, Embedding, Optimizer, Sequential,
};
use crate::DEFAULT_LEARNING_RATE;

/// Gradients for every trainable parameter of a [`SchNetModel`]
#[derive(Debug, Clone)]
pub struct SchNetGradients {
    pub embedding: Array2<f64>,
    pub blocks: Vec<BlockGradients>,
    pub readout: Vec<DenseGradients>,
}

impl SchNetGradients {
    /// Accumulate another gradient into this one
    pub fn add(&mut self, other: &SchNetGradients) {
        self.embedding += &other.embedding;
        for (a, b) in self.blocks.iter_mut().zip(&other.blocks) {
            a.add(b);
        }
        for (a, b) in self.readout.iter_mut().zip(&other.readout) {
            a.add(b);
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.embedding *= factor;
        for g in &mut self.blocks {
            g.scale(factor);
        }
        for g in &mut self.readout {
            g.scale(factor);
        }
    }

    /// Dense-layer gradients in parameter order
    fn dense(&self) -> Vec<&DenseGradients> {
        let mut grads: Vec<&DenseGradients> = Vec::new();
        for block in &self.blocks {
            grads.extend(block.h1.iter().chain(&block.h2).chain(&block.h3));
        }
        grads.extend(self.readout.iter());
        grads
    }

    /// Euclidean norm over all parameters
    pub fn norm(&self) -> f64 {
        let dense: f64 = self
            .dense()
            .iter()
            .map(|g| g.weights.mapv(|x| x * x).sum() + g.biases.mapv(|x| x * x).sum())
            .sum();
        (self.embedding.mapv(|x| x * x).sum() + dense).sqrt()
    }
}

struct ForwardCache {
    nodes: Vec<usize>,
    logits: Array1<f64>,
}

/// SchNet graph classifier
#[derive(Serialize, Deserialize)]
pub struct SchNetModel {
    pub config: SchNetConfig,
    pub(crate) embedding: Embedding,
    pub(crate) blocks: Vec<InteractionBlock>,
    pub(crate) readout: Sequential,
    #[serde(skip)]
    optimizers: Vec<Box<dyn Optimizer>>,
    #[serde(skip)]
    cache: Option<ForwardCache>,
}

impl SchNetModel {
    /// Create a freshly initialized model
    pub fn new(config: SchNetConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let embedding = Embedding::new(config.vocab, config.channels, &mut rng);
        let blocks = (0..config.gnn_blocks)
            .map(|_| InteractionBlock::new(config.channels, config.edge_features, &mut rng))
            .collect();
        let readout = Sequential::new(
            config.channels,
            &[
                (config.readout_channels(), ActivationType::ShiftedSoftplus),
                (config.label_dim, ActivationType::Linear),
            ],
            &mut rng,
        );

        let mut model = Self {
            config,
            embedding,
            blocks,
            readout,
            optimizers: Vec::new(),
            cache: None,
        };
        model.set_optimizer(Box::new(Adam::new(DEFAULT_LEARNING_RATE)));
        Ok(model)
    }

    /// Use a copy of `optimizer` for every parameter group
    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        self.optimizers = (0..self.num_parameter_groups())
            .map(|_| optimizer.clone_box())
            .collect();
    }

    /// Embedding table plus one group per dense layer
    fn num_parameter_groups(&self) -> usize {
        let block_layers: usize = self
            .blocks
            .iter()
            .map(|b| b.h1.layers.len() + b.h2.layers.len() + b.h3.layers.len())
            .sum();
        1 + block_layers + self.readout.layers.len()
    }

    /// Training forward pass returning logits `[label_dim]`
    pub fn forward(&mut self, graph: &SampleGraph) -> Result<Array1<f64>> {
        check_graph(graph)?;

        let mut h = self.embedding.forward(&graph.nodes)?;
        for block in &mut self.blocks {
            h = block.forward(&h, &graph.edge_features, &graph.edge_index)?;
        }
        let out = self.readout.forward(&h)?;
        let logits = node_mean(&out)?;

        self.cache = Some(ForwardCache {
            nodes: graph.nodes.clone(),
            logits: logits.clone(),
        });
        Ok(logits)
    }

    /// Inference forward pass returning logits
    pub fn predict_logits(&self, graph: &SampleGraph) -> Result<Array1<f64>> {
        check_graph(graph)?;

        let mut h = self.embedding.forward(&graph.nodes)?;
        for block in &self.blocks {
            h = block.predict(&h, &graph.edge_features, &graph.edge_index)?;
        }
        node_mean(&self.readout.predict(&h)?)
    }

    /// Class probabilities
    pub fn predict_proba(&self, graph: &SampleGraph) -> Result<Array1<f64>> {
        Ok(softmax(&self.predict_logits(graph)?))
    }

    /// Most likely class
    pub fn predict_class(&self, graph: &SampleGraph) -> Result<usize> {
        Ok(argmax(&self.predict_logits(graph)?))
    }

    /// Gradients of the cross-entropy loss of the last `forward` against `label`
    pub fn backward(&self, label: usize) -> Result<SchNetGradients> {
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| Error::ModelError("backward called before forward".to_string()))?;
        let dlogits = sparse_categorical_cross_entropy_gradient(&cache.logits, label)?;

        // mean over nodes spreads the gradient evenly
        let m = cache.nodes.len();
        let d_out = Array2::from_shape_fn((m, dlogits.len()), |(_, c)| dlogits[c] / m as f64);
        let (mut dh, readout) = self.readout.backward(&d_out)?;

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.iter().rev() {
            let (grad, block_grads) = block.backward(&dh)?;
            blocks.push(block_grads);
            dh = grad;
        }
        blocks.reverse();

        let embedding = self.embedding.backward(&cache.nodes, &dh)?;

        Ok(SchNetGradients {
            embedding,
            blocks,
            readout,
        })
    }

    /// Zero gradients with this model's structure
    pub fn zero_gradients(&self) -> SchNetGradients {
        SchNetGradients {
            embedding: Array2::zeros(self.embedding.table.dim()),
            blocks: self.blocks.iter().map(|b| b.zero_gradients()).collect(),
            readout: self.readout.zero_gradients(),
        }
    }

    /// One optimizer step
    pub fn apply_gradients(&mut self, gradients: &SchNetGradients) -> Result<()> {
        if gradients.blocks.len() != self.blocks.len() {
            return Err(Error::ShapeError(format!(
                "gradients for {} blocks applied to a model with {}",
                gradients.blocks.len(),
                self.blocks.len()
            )));
        }
        if self.optimizers.len() != self.num_parameter_groups() {
            self.set_optimizer(Box::new(Adam::new(DEFAULT_LEARNING_RATE)));
        }

        let mut optimizers = std::mem::take(&mut self.optimizers);
        let result = self.step(&mut optimizers, gradients);
        self.optimizers = optimizers;
        result
    }

    fn step(&mut self, optimizers: &mut [Box<dyn Optimizer>], gradients: &SchNetGradients) -> Result<()> {
        let (first, rest) = optimizers
            .split_first_mut()
            .ok_or_else(|| Error::ModelError("no optimizer state".to_string()))?;
        if gradients.embedding.dim() != self.embedding.table.dim() {
            return Err(Error::ShapeError("embedding gradient shape".to_string()));
        }
        first.update_weights(&mut self.embedding.table, &gradients.embedding);

        let dense_grads = gradients.dense();
        let layers = self.dense_layers_mut();
        if dense_grads.len() != layers.len() || layers.len() != rest.len() {
            return Err(Error::ShapeError(format!(
                "{} layer gradients for {} layers",
                dense_grads.len(),
                layers.len()
            )));
        }
        for ((layer, grad), opt) in layers.into_iter().zip(dense_grads).zip(rest.iter_mut()) {
            if grad.weights.dim() != layer.weights.dim() {
                return Err(Error::ShapeError(format!(
                    "weight gradient {:?} for layer {:?}",
                    grad.weights.dim(),
                    layer.weights.dim()
                )));
            }
            opt.update_weights(&mut layer.weights, &grad.weights);
            opt.update_biases(&mut layer.biases, &grad.biases);
        }
        Ok(())
    }

    /// Dense layers in parameter order
    fn dense_layers_mut(&mut self) -> Vec<&mut DenseLayer> {
        let mut layers: Vec<&mut DenseLayer> = Vec::new();
        for block in &mut self.blocks {
            for net in block.networks_mut() {
                layers.extend(net.layers.iter_mut());
            }
        }
        layers.extend(self.readout.layers.iter_mut());
        layers
    }

    /// Drop all cached activations
    pub fn clear_cache(&mut self) {
        self.cache = None;
        for block in &mut self.blocks {
            block.clear_cache();
        }
        self.readout.clear_cache();
    }

    /// Get total number of parameters
    pub fn num_parameters(&self) -> usize {
        self.embedding.num_parameters()
            + self.blocks.iter().map(|b| b.num_parameters()).sum::<usize>()
            + self.readout.num_parameters()
    }

    /// Save model to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Load model from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut model: SchNetModel = serde_json::from_reader(reader)?;
        model.config.validate()?;
        if model.blocks.len() != model.config.gnn_blocks
            || model.embedding.dim() != model.config.channels
            || model.readout.output_size() != Some(model.config.label_dim)
        {
            return Err(Error::ModelError(
                "saved weights do not match saved configuration".to_string(),
            ));
        }
        model.set_optimizer(Box::new(Adam::new(DEFAULT_LEARNING_RATE)));
        Ok(model)
    }

    /// Human-readable description of the architecture
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "SchNet Model Summary".to_string(),
            "====================".to_string(),
            format!(
                "Embedding: {} types -> {} channels, params: {}",
                self.embedding.vocab_size(),
                self.embedding.dim(),
                self.embedding.num_parameters()
            ),
        ];
        for (i, block) in self.blocks.iter().enumerate() {
            lines.push(format!(
                "Interaction block {}: params: {}",
                i + 1,
                block.num_parameters()
            ));
        }
        for (i, layer) in self.readout.layers.iter().enumerate() {
            lines.push(format!(
                "Readout {}: {} -> {} ({:?}), params: {}",
                i + 1,
                layer.input_size,
                layer.output_size,
                layer.activation_type,
                layer.num_parameters()
            ));
        }
        lines.push("Pooling: mean over nodes".to_string());
        lines.push(format!("Total parameters: {}", self.num_parameters()));
        lines.join("\n")
    }
}

impl Clone for SchNetModel {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            embedding: self.embedding.clone(),
            blocks: self.blocks.clone(),
            readout: self.readout.clone(),
            optimizers: self.optimizers.iter().map(|o| o.clone_box()).collect(),
            cache: None,
        }
    }
}

impl std::fmt::Debug for SchNetModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchNetModel")
            .field("config", &self.config)
            .field("parameters", &self.num_parameters())
            .finish()
    }
}

fn check_graph(graph: &SampleGraph) -> Result<()> {
    graph.validate()?;
    if graph.num_nodes() == 0 {
        return Err(Error::ShapeError("graph has no nodes".to_string()));
    }
    Ok(())
}

fn node_mean(out: &Array2<f64>) -> Result<Array1<f64>> {
    out.mean_axis(Axis(0))
        .ok_or_else(|| Error::ShapeError("cannot pool an empty graph".to_string()))
}
