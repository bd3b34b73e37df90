//! Optimization Algorithms
//!
//! Each parameter group (a dense layer or the embedding table) owns its own
//! optimizer instance, so moment estimates never mix between tensors.
//! - SGD (Stochastic Gradient Descent), optionally with momentum
//! - Adam (Adaptive Moment Estimation)

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Optimizer trait for weight updates
pub trait Optimizer: Send + Sync {
    /// Update weights given gradients
    fn update_weights(&mut self, weights: &mut Array2<f64>, gradients: &Array2<f64>);

    /// Update biases given gradients
    fn update_biases(&mut self, biases: &mut Array1<f64>, gradients: &Array1<f64>);

    /// Reset optimizer state (for new training run)
    fn reset(&mut self);

    /// Clone the optimizer for each parameter group
    fn clone_box(&self) -> Box<dyn Optimizer>;
}

/// Available optimizers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerType {
    Sgd,
    Adam,
}

/// Create an optimizer template of the given type
pub fn create_optimizer(optimizer_type: OptimizerType, learning_rate: f64) -> Box<dyn Optimizer> {
    match optimizer_type {
        OptimizerType::Sgd => Box::new(SGD::new(learning_rate)),
        OptimizerType::Adam => Box::new(Adam::new(learning_rate)),
    }
}

/// Stochastic Gradient Descent with optional momentum
#[derive(Clone, Serialize, Deserialize)]
pub struct SGD {
    pub learning_rate: f64,
    pub momentum: f64,
    #[serde(skip)]
    velocity_w: Option<Array2<f64>>,
    #[serde(skip)]
    velocity_b: Option<Array1<f64>>,
}

impl SGD {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            velocity_w: None,
            velocity_b: None,
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for SGD {
    fn update_weights(&mut self, weights: &mut Array2<f64>, gradients: &Array2<f64>) {
        if self.momentum > 0.0 {
            let v = self.velocity_w.get_or_insert_with(|| Array2::zeros(weights.dim()));
            *v = &*v * self.momentum - gradients * self.learning_rate;
            *weights += &*v;
        } else {
            weights.scaled_add(-self.learning_rate, gradients);
        }
    }

    fn update_biases(&mut self, biases: &mut Array1<f64>, gradients: &Array1<f64>) {
        if self.momentum > 0.0 {
            let v = self.velocity_b.get_or_insert_with(|| Array1::zeros(biases.len()));
            *v = &*v * self.momentum - gradients * self.learning_rate;
            *biases += &*v;
        } else {
            biases.scaled_add(-self.learning_rate, gradients);
        }
    }

    fn reset(&mut self) {
        self.velocity_w = None;
        self.velocity_b = None;
    }

    fn clone_box(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }
}

/// Adam optimizer (Adaptive Moment Estimation)
#[derive(Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    #[serde(skip)]
    t: i32,
    #[serde(skip)]
    m_w: Option<Array2<f64>>,
    #[serde(skip)]
    v_w: Option<Array2<f64>>,
    #[serde(skip)]
    m_b: Option<Array1<f64>>,
    #[serde(skip)]
    v_b: Option<Array1<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m_w: None,
            v_w: None,
            m_b: None,
            v_b: None,
        }
    }

    /// Number of weight updates applied so far
    pub fn steps(&self) -> i32 {
        self.t
    }

    fn bias_correction(&self) -> (f64, f64) {
        let t = self.t.max(1);
        (1.0 - self.beta1.powi(t), 1.0 - self.beta2.powi(t))
    }
}

impl Optimizer for Adam {
    fn update_weights(&mut self, weights: &mut Array2<f64>, gradients: &Array2<f64>) {
        self.t += 1;
        let (c1, c2) = self.bias_correction();
        let (beta1, beta2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.epsilon);

        let m = self.m_w.get_or_insert_with(|| Array2::zeros(weights.dim()));
        let v = self.v_w.get_or_insert_with(|| Array2::zeros(weights.dim()));

        *m = &*m * beta1 + gradients * (1.0 - beta1);
        *v = &*v * beta2 + &(gradients * gradients) * (1.0 - beta2);

        let m_hat = &*m / c1;
        let v_hat = &*v / c2;
        *weights -= &(m_hat * lr / (v_hat.mapv(f64::sqrt) + eps));
    }

    fn update_biases(&mut self, biases: &mut Array1<f64>, gradients: &Array1<f64>) {
        // Step counter advances in update_weights
        let (c1, c2) = self.bias_correction();
        let (beta1, beta2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.epsilon);

        let m = self.m_b.get_or_insert_with(|| Array1::zeros(biases.len()));
        let v = self.v_b.get_or_insert_with(|| Array1::zeros(biases.len()));

        *m = &*m * beta1 + gradients * (1.0 - beta1);
        *v = &*v * beta2 + &(gradients * gradients) * (1.0 - beta2);

        let m_hat = &*m / c1;
        let v_hat = &*v / c2;
        *biases -= &(m_hat * lr / (v_hat.mapv(f64::sqrt) + eps));
    }

    fn reset(&mut self) {
        self.t = 0;
        self.m_w = None;
        self.v_w = None;
        self.m_b = None;
        self.v_b = None;
    }

    fn clone_box(&self) -> Box<dyn Optimizer> {
        Box::new(self.clone())
    }
}
