//! Off-policy goal relabeling.
//!
//! A stored high-level transition says "goal g was issued, then the low-level
//! agent did these things". Once the low-level policy has kept learning, g is
//! no longer a faithful description of what produced that behaviour. Before a
//! sampled batch is used, each goal is replaced by the candidate under which
//! the *current* low-level policy would most likely have taken the recorded
//! actions.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::trace;

use super::goal::GoalSpace;
use crate::agent::{ActionLikelihood, BatchCorrection};
use crate::buffer::{ReplayBatch, Trajectory};

/// Relabels the goals of sampled high-level transitions.
///
/// Candidates are the original goal, the displacement actually achieved, and
/// `samples` Gaussian perturbations of that displacement with per-component
/// standard deviation `sigma × limit`. All candidates are clipped to the goal
/// bounds.
pub struct OffPolicyCorrection<'a> {
    policy: &'a dyn ActionLikelihood,
    goal_space: &'a GoalSpace,
    rng: &'a mut StdRng,
    samples: usize,
    sigma: f64,
}

impl<'a> OffPolicyCorrection<'a> {
    pub fn new(
        policy: &'a dyn ActionLikelihood,
        goal_space: &'a GoalSpace,
        rng: &'a mut StdRng,
        samples: usize,
        sigma: f64,
    ) -> Self {
        Self {
            policy,
            goal_space,
            rng,
            samples,
            sigma,
        }
    }

    /// Candidate goals for a segment from `state` to `next_state`.
    ///
    /// The original goal always comes first, the achieved displacement second.
    pub fn candidates(&mut self, original: &[f64], state: &[f64], next_state: &[f64]) -> Vec<Vec<f64>> {
        let displacement = self.goal_space.displacement(state, next_state);
        let limits = self.goal_space.bounds().high().to_vec();

        let mut candidates = Vec::with_capacity(self.samples + 2);
        candidates.push(self.goal_space.clip(original));
        candidates.push(self.goal_space.clip(&displacement));
        for _ in 0..self.samples {
            let noisy: Vec<f64> = displacement
                .iter()
                .zip(&limits)
                .map(|(d, l)| d + self.rng.sample::<f64, _>(StandardNormal) * self.sigma * l)
                .collect();
            candidates.push(self.goal_space.clip(&noisy));
        }
        candidates
    }

    /// Log-likelihood of the recorded low-level actions had `goal` been issued
    /// at the start of `trajectory`.
    ///
    /// The goal is carried along the recorded states with the goal transition,
    /// exactly as it would have been during execution.
    pub fn score(&self, goal: &[f64], trajectory: &Trajectory) -> f64 {
        let steps = trajectory.len();
        if steps == 0 {
            return 0.0;
        }
        let state_dim = self.goal_space.state_dim();
        let input_dim = state_dim + self.goal_space.dim();
        let action_dim = trajectory.actions[0].len();

        let mut inputs = Array2::zeros((steps, input_dim));
        let mut actions = Array2::zeros((steps, action_dim));
        let mut current = goal.to_vec();
        for i in 0..steps {
            let state = &trajectory.states[i];
            for (j, v) in self.goal_space.condition(state, &current).into_iter().enumerate() {
                inputs[[i, j]] = v;
            }
            for (j, &a) in trajectory.actions[i].iter().enumerate() {
                actions[[i, j]] = a;
            }
            if let Some(next) = trajectory.states.get(i + 1) {
                current = self.goal_space.transition(&current, state, next);
            }
        }
        self.policy.log_likelihood(inputs.view(), actions.view())
    }

    /// The best-scoring candidate goal. Ties keep the earlier candidate, so
    /// the original goal survives unless something strictly better exists.
    pub fn relabel(
        &mut self,
        original: &[f64],
        state: &[f64],
        next_state: &[f64],
        trajectory: &Trajectory,
    ) -> Vec<f64> {
        let candidates = self.candidates(original, state, next_state);
        self.select(candidates, trajectory)
    }

    /// Picks the highest-scoring goal among `candidates`.
    pub fn select(&self, candidates: Vec<Vec<f64>>, trajectory: &Trajectory) -> Vec<f64> {
        let mut best: Option<(f64, Vec<f64>)> = None;
        for candidate in candidates {
            let score = self.score(&candidate, trajectory);
            if best.as_ref().map_or(true, |(b, _)| score > *b) {
                best = Some((score, candidate));
            }
        }
        best.map(|(_, goal)| goal).unwrap_or_default()
    }
}

impl BatchCorrection for OffPolicyCorrection<'_> {
    fn correct(&mut self, batch: &mut ReplayBatch) {
        let mut changed = 0usize;
        for row in 0..batch.len() {
            let trajectory = match &batch.trajectories[row] {
                Some(t) if !t.is_empty() => t.clone(),
                _ => continue,
            };
            let original_action = batch.actions.row(row).to_vec();
            let original_goal = self.goal_space.scale(&original_action);
            let state = batch.states.row(row).to_vec();
            let next_state = batch.next_states.row(row).to_vec();

            let goal = self.relabel(&original_goal, &state, &next_state, &trajectory);
            let action = self.goal_space.normalize(&goal);
            if action != original_action {
                changed += 1;
            }
            for (j, a) in action.into_iter().enumerate() {
                batch.actions[[row, j]] = a;
            }
        }
        trace!(rows = batch.len(), changed, "relabeled high-level batch");
    }
}
