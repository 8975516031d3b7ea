//! Trainable function approximators.
//!
//! The agents never see layers, autodiff or optimizers directly. They talk
//! to a [`Model`]: something that maps a batch of inputs to a batch of
//! outputs, can take a gradient step, and exposes its parameters as one flat
//! vector so two models of the same shape can be blended.
//!
//! Two backends are provided:
//! - [`Mlp`]: pure-Rust multilayer perceptron on `ndarray` (always available).
//! - [`TorchModel`]: libtorch-backed network via `tch` (feature `libtorch`).

pub mod error;
pub mod mlp;
#[cfg(feature = "libtorch")]
pub mod tch_backend;

use std::path::Path;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

pub use error::ModelError;
pub use mlp::Mlp;
#[cfg(feature = "libtorch")]
pub use tch_backend::TorchModel;

/// Activation applied to the output layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputActivation {
    /// Unbounded output (critics).
    Identity,
    /// Output squashed into `(-1, 1)` (actors).
    Tanh,
}

/// Shape and optimizer settings of a network.
///
/// Hidden layers always use ReLU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input_dim: usize,
    pub output_dim: usize,
    pub hidden_units: Vec<usize>,
    pub output_activation: OutputActivation,
    pub learning_rate: f64,
}

impl NetworkSpec {
    /// Actor network: `state -> action` with a tanh-bounded output.
    pub fn actor(state_dim: usize, action_dim: usize, hidden: &[usize], lr: f64) -> Self {
        Self {
            input_dim: state_dim,
            output_dim: action_dim,
            hidden_units: hidden.to_vec(),
            output_activation: OutputActivation::Tanh,
            learning_rate: lr,
        }
    }

    /// Critic network: `(state ++ action) -> value`.
    pub fn critic(state_dim: usize, action_dim: usize, hidden: &[usize], lr: f64) -> Self {
        Self {
            input_dim: state_dim + action_dim,
            output_dim: 1,
            hidden_units: hidden.to_vec(),
            output_activation: OutputActivation::Identity,
            learning_rate: lr,
        }
    }

    /// Layer widths from input to output.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_units.len() + 2);
        sizes.push(self.input_dim);
        sizes.extend(&self.hidden_units);
        sizes.push(self.output_dim);
        sizes
    }
}

/// A trainable model, seen as an opaque capability.
///
/// Inputs and outputs are row-major batches: one row per sample.
pub trait Model: Sized {
    /// File extension of the persisted artifact (without the dot).
    const FILE_EXTENSION: &'static str;

    /// Builds a freshly initialised model.
    fn new(spec: &NetworkSpec, seed: u64) -> Self;

    fn spec(&self) -> &NetworkSpec;

    /// Forward pass without recording gradients.
    fn predict(&self, inputs: ArrayView2<f64>) -> Array2<f64>;

    /// One optimizer step on the mean squared error between the outputs and
    /// `targets`. Returns the loss measured before the step.
    fn fit(&mut self, inputs: ArrayView2<f64>, targets: ArrayView2<f64>) -> f64;

    /// Gradient of `sum(output ⊙ output_grad)` with respect to the inputs.
    fn input_gradient(&self, inputs: ArrayView2<f64>, output_grad: ArrayView2<f64>) -> Array2<f64>;

    /// One optimizer step that descends along the supplied upstream gradient
    /// `dL/d(output)`.
    fn apply_output_gradient(&mut self, inputs: ArrayView2<f64>, output_grad: ArrayView2<f64>);

    /// All parameters, flattened in a deterministic order.
    fn parameters(&self) -> Vec<f64>;

    /// Overwrites all parameters; the slice must match [`Model::parameters`].
    fn set_parameters(&mut self, params: &[f64]) -> Result<(), ModelError>;

    /// Copy with identical parameters and a fresh optimizer state.
    fn duplicate(&self) -> Self;

    fn save(&self, path: &Path) -> Result<(), ModelError>;

    fn load(path: &Path) -> Result<Self, ModelError>;
}

/// Blends `behaviour` into `target`: `θ_t ← τ·θ_b + (1 − τ)·θ_t`.
pub fn soft_update<M: Model>(behaviour: &M, target: &mut M, tau: f64) -> Result<(), ModelError> {
    let online = behaviour.parameters();
    let mut blended = target.parameters();
    if online.len() != blended.len() {
        return Err(ModelError::ParameterCount {
            expected: blended.len(),
            actual: online.len(),
        });
    }
    for (t, b) in blended.iter_mut().zip(&online) {
        *t = tau * b + (1.0 - tau) * *t;
    }
    target.set_parameters(&blended)
}
