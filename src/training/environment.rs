//! Environment interface for continuous-control training.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::space::BoxSpace;

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Observation after the step.
    pub next_state: Vec<f64>,
    pub reward: f64,
    /// Whether the episode ended on its own (not by a step limit).
    pub done: bool,
    /// Free-form diagnostics.
    pub info: BTreeMap<String, f64>,
}

/// A continuous-state, continuous-action episodic environment.
///
/// # Lifecycle
///
/// 1. Call [`Environment::reset`] to start an episode.
/// 2. Repeatedly call [`Environment::step`] with actions inside
///    [`Environment::action_space`] until `done`.
pub trait Environment {
    fn observation_space(&self) -> &BoxSpace;

    fn action_space(&self) -> &BoxSpace;

    /// Starts a new episode and returns the first observation.
    fn reset(&mut self) -> Vec<f64>;

    fn step(&mut self, action: &[f64]) -> StepResult;

    /// Draws the current state. `goal` is the absolute target of a
    /// hierarchical controller, when there is one.
    fn render(&mut self, _goal: Option<&[f64]>) {}
}

/// A point in `[-1, 1]^d` that must be steered to the origin.
///
/// Each action component moves the point by at most `max_speed`. The reward
/// is the negative distance to the origin; the episode ends once the point
/// is within `tolerance` of it.
#[derive(Debug, Clone)]
pub struct PointMass {
    position: Vec<f64>,
    observation_space: BoxSpace,
    action_space: BoxSpace,
    max_speed: f64,
    tolerance: f64,
    rng: StdRng,
}

impl PointMass {
    pub fn new(dim: usize, seed: u64) -> Self {
        Self {
            position: vec![0.0; dim],
            observation_space: BoxSpace::symmetric(&vec![2.0; dim]),
            action_space: BoxSpace::unit(dim),
            max_speed: 0.1,
            tolerance: 0.05,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    fn distance(&self) -> f64 {
        self.position.iter().map(|p| p * p).sum::<f64>().sqrt()
    }
}

impl Environment for PointMass {
    fn observation_space(&self) -> &BoxSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    fn reset(&mut self) -> Vec<f64> {
        for p in &mut self.position {
            *p = self.rng.gen_range(-1.0..1.0);
        }
        self.position.clone()
    }

    fn step(&mut self, action: &[f64]) -> StepResult {
        let action = self.action_space.clip(action);
        for (p, a) in self.position.iter_mut().zip(&action) {
            *p += a * self.max_speed;
        }
        self.position = self.observation_space.clip(&self.position);

        let distance = self.distance();
        let mut info = BTreeMap::new();
        info.insert("distance".to_string(), distance);
        StepResult {
            next_state: self.position.clone(),
            reward: -distance,
            done: distance < self.tolerance,
            info,
        }
    }

    fn render(&mut self, goal: Option<&[f64]>) {
        info!(position = ?self.position, goal = ?goal, "point mass");
    }
}
