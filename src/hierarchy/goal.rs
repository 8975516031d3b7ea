//! Goal protocol.
//!
//! A goal is a desired displacement of a subset of the state's components.
//! As the environment moves, the goal is re-expressed relative to the new
//! state so that the absolute target `state + goal` stays put; the low-level
//! agent is rewarded for how close it lands to that target.

use serde::{Deserialize, Serialize};

use crate::agent::ConfigError;
use crate::space::BoxSpace;

/// The goal subspace: which state components goals refer to and how far a
/// single goal may reach along each of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalSpace {
    state_dim: usize,
    indices: Vec<usize>,
    bounds: BoxSpace,
}

impl GoalSpace {
    /// Goals over the state components `indices`, bounded by `±limits`.
    pub fn new(state_dim: usize, indices: Vec<usize>, limits: &[f64]) -> Result<Self, ConfigError> {
        if indices.is_empty() {
            return Err(ConfigError::Empty {
                field: "goal_indices",
            });
        }
        if indices.len() != limits.len() {
            return Err(ConfigError::GoalShapeMismatch {
                indices: indices.len(),
                limits: limits.len(),
            });
        }
        if let Some(&index) = indices.iter().find(|&&i| i >= state_dim) {
            return Err(ConfigError::GoalIndexOutOfBounds { index, state_dim });
        }
        for &limit in limits {
            crate::agent::config::check("goal_limits", limit, "> 0", |v| v > 0.0)?;
        }
        Ok(Self {
            state_dim,
            indices,
            bounds: BoxSpace::symmetric(limits),
        })
    }

    /// Goals over the whole state.
    pub fn full(state_dim: usize, limits: &[f64]) -> Result<Self, ConfigError> {
        Self::new(state_dim, (0..state_dim).collect(), limits)
    }

    /// Goal dimensionality.
    pub fn dim(&self) -> usize {
        self.indices.len()
    }

    /// Dimensionality of the states goals are taken from.
    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// State components the goal refers to, in goal order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Symmetric bounds of a goal.
    pub fn bounds(&self) -> &BoxSpace {
        &self.bounds
    }

    /// The goal-relevant components of `state`.
    pub fn project(&self, state: &[f64]) -> Vec<f64> {
        assert_eq!(state.len(), self.state_dim, "state dimension mismatch");
        self.indices.iter().map(|&i| state[i]).collect()
    }

    /// `goal' = state + goal − next_state`, restricted to the goal subspace.
    ///
    /// # Panics
    ///
    /// Panics on goal or state dimension mismatch.
    pub fn transition(&self, goal: &[f64], state: &[f64], next_state: &[f64]) -> Vec<f64> {
        assert_eq!(goal.len(), self.dim(), "goal dimension mismatch");
        let s = self.project(state);
        let ns = self.project(next_state);
        s.iter()
            .zip(goal)
            .zip(&ns)
            .map(|((s, g), n)| s + g - n)
            .collect()
    }

    /// Negative Euclidean distance between the target `state + goal` and
    /// what was reached. Zero means perfect tracking.
    pub fn intrinsic_reward(&self, goal: &[f64], state: &[f64], next_state: &[f64]) -> f64 {
        let residual = self.transition(goal, state, next_state);
        -residual.iter().map(|r| r * r).sum::<f64>().sqrt()
    }

    /// Displacement actually achieved between two states.
    pub fn displacement(&self, state: &[f64], next_state: &[f64]) -> Vec<f64> {
        let s = self.project(state);
        self.project(next_state)
            .iter()
            .zip(&s)
            .map(|(n, s)| n - s)
            .collect()
    }

    /// Maps a high-level action in `[-1, 1]^dim` to a goal.
    pub fn scale(&self, normalized: &[f64]) -> Vec<f64> {
        self.bounds.scale(normalized)
    }

    /// Maps a goal back to `[-1, 1]^dim`, clipping out-of-range components.
    pub fn normalize(&self, goal: &[f64]) -> Vec<f64> {
        self.bounds.normalize(goal)
    }

    /// Clamps each goal component to `±limit`.
    pub fn clip(&self, goal: &[f64]) -> Vec<f64> {
        self.bounds.clip(goal)
    }

    /// Low-level agent input: the state followed by the goal.
    pub fn condition(&self, state: &[f64], goal: &[f64]) -> Vec<f64> {
        let mut input = Vec::with_capacity(state.len() + goal.len());
        input.extend_from_slice(state);
        input.extend_from_slice(goal);
        input
    }
}
