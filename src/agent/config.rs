//! Hyperparameters of a single actor-critic agent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A hyperparameter outside its valid range.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("goal index {index} is outside the {state_dim}-dimensional state")]
    GoalIndexOutOfBounds { index: usize, state_dim: usize },

    #[error("{indices} goal indices but {limits} goal limits")]
    GoalShapeMismatch { indices: usize, limits: usize },
}

/// Configuration of a DDPG agent.
///
/// Every field has a default, so partial JSON documents deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdpgConfig {
    /// Adam learning rate of the behaviour actor.
    pub learning_rate_actor: f64,
    /// Adam learning rate of the behaviour critic.
    pub learning_rate_critic: f64,
    /// Transitions per update.
    pub batch_size: usize,
    /// Replay buffer capacity.
    pub buffer_capacity: usize,
    /// Discount factor γ.
    pub gamma: f64,
    /// Soft-update rate τ of the target networks.
    pub tau: f64,
    /// Initial standard deviation of the Gaussian exploration noise.
    pub exploration_magnitude: f64,
    /// Multiplicative decay applied after every exploring action.
    pub exploration_decay: f64,
    /// Hidden layer widths shared by actor and critic.
    pub hidden_units: Vec<usize>,
    /// No update is made while the buffer holds fewer transitions.
    pub learning_starts: usize,
    /// Seed for weight initialisation, noise and sampling.
    pub seed: u64,
}

impl Default for DdpgConfig {
    fn default() -> Self {
        Self {
            learning_rate_actor: 1e-4,
            learning_rate_critic: 1e-4,
            batch_size: 32,
            buffer_capacity: 150_000,
            gamma: 0.99,
            tau: 0.001,
            exploration_magnitude: 0.5,
            exploration_decay: 0.99999,
            hidden_units: vec![100, 50],
            learning_starts: 0,
            seed: 0,
        }
    }
}

impl DdpgConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("learning_rate_actor", self.learning_rate_actor, "> 0", |v| v > 0.0)?;
        check("learning_rate_critic", self.learning_rate_critic, "> 0", |v| v > 0.0)?;
        check("batch_size", self.batch_size as f64, ">= 1", |v| v >= 1.0)?;
        check("buffer_capacity", self.buffer_capacity as f64, ">= 1", |v| v >= 1.0)?;
        check("gamma", self.gamma, "[0, 1]", |v| (0.0..=1.0).contains(&v))?;
        check("tau", self.tau, "(0, 1]", |v| v > 0.0 && v <= 1.0)?;
        check("exploration_magnitude", self.exploration_magnitude, ">= 0", |v| v >= 0.0)?;
        check("exploration_decay", self.exploration_decay, "(0, 1]", |v| {
            v > 0.0 && v <= 1.0
        })?;
        if self.hidden_units.is_empty() {
            return Err(ConfigError::Empty {
                field: "hidden_units",
            });
        }
        if self.hidden_units.contains(&0) {
            return Err(ConfigError::OutOfRange {
                field: "hidden_units",
                value: 0.0,
                expected: ">= 1 per layer",
            });
        }
        Ok(())
    }
}

pub(crate) fn check(
    field: &'static str,
    value: f64,
    expected: &'static str,
    ok: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if value.is_finite() && ok(value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected,
        })
    }
}
