//! Experience replay.
//!
//! A fixed-capacity FIFO of [`Transition`]s with uniform sampling without
//! replacement. High-level transitions additionally carry the low-level
//! [`Trajectory`] that was executed under their goal, so that the goal can be
//! relabeled later.

mod error;

use std::collections::VecDeque;

use ndarray::{Array1, Array2};
use rand::Rng;

pub use error::BufferError;

/// States and actions of the low-level agent while one goal was active.
///
/// `states[i]` is the environment state in which `actions[i]` was taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    pub states: Vec<Vec<f64>>,
    pub actions: Vec<Vec<f64>>,
}

impl Trajectory {
    /// Appends one low-level step.
    pub fn push(&mut self, state: Vec<f64>, action: Vec<f64>) {
        self.states.push(state);
        self.actions.push(action);
    }

    /// Number of low-level steps recorded.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// `true` if no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// A single `(s, a, s', r, done)` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State the action was taken in.
    pub state: Vec<f64>,
    pub action: Vec<f64>,
    /// State reached after the action.
    pub next_state: Vec<f64>,
    pub reward: f64,
    /// Whether `next_state` is terminal.
    pub done: bool,
    /// Only present for high-level transitions.
    pub trajectory: Option<Trajectory>,
}

impl Transition {
    pub fn new(
        state: Vec<f64>,
        action: Vec<f64>,
        next_state: Vec<f64>,
        reward: f64,
        done: bool,
    ) -> Self {
        Self {
            state,
            action,
            next_state,
            reward,
            done,
            trajectory: None,
        }
    }

    /// Attaches the low-level trajectory executed under this transition's goal.
    pub fn with_trajectory(mut self, trajectory: Trajectory) -> Self {
        self.trajectory = Some(trajectory);
        self
    }
}

/// A sampled batch, stored field by field.
#[derive(Debug, Clone)]
pub struct ReplayBatch {
    /// Buffer positions the rows were drawn from.
    pub indices: Vec<usize>,
    /// One state per row, `(len, state_dim)`.
    pub states: Array2<f64>,
    /// One action per row, `(len, action_dim)`.
    pub actions: Array2<f64>,
    /// Successor states, `(len, state_dim)`.
    pub next_states: Array2<f64>,
    pub rewards: Array1<f64>,
    /// Terminal flags, one per row.
    pub dones: Array1<bool>,
    /// Low-level trajectories; `None` for rows without one.
    pub trajectories: Vec<Option<Trajectory>>,
}

impl ReplayBatch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// `true` for a batch drawn with `batch_size` zero.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `1.0` for non-terminal rows and `0.0` for terminal ones.
    pub fn continuation_mask(&self) -> Array1<f64> {
        self.dones.mapv(|d| if d { 0.0 } else { 1.0 })
    }

    fn gather(buffer: &VecDeque<Transition>, indices: Vec<usize>) -> Self {
        let n = indices.len();
        let width = |f: fn(&Transition) -> usize| indices.first().map_or(0, |&i| f(&buffer[i]));
        let state_dim = width(|t| t.state.len());
        let action_dim = width(|t| t.action.len());

        let mut states = Array2::zeros((n, state_dim));
        let mut actions = Array2::zeros((n, action_dim));
        let mut next_states = Array2::zeros((n, state_dim));
        let mut rewards = Array1::zeros(n);
        let mut dones = Array1::from_elem(n, false);
        let mut trajectories = Vec::with_capacity(n);

        for (row, &i) in indices.iter().enumerate() {
            let t = &buffer[i];
            states.row_mut(row).assign(&Array1::from(t.state.clone()));
            actions.row_mut(row).assign(&Array1::from(t.action.clone()));
            next_states
                .row_mut(row)
                .assign(&Array1::from(t.next_state.clone()));
            rewards[row] = t.reward;
            dones[row] = t.done;
            trajectories.push(t.trajectory.clone());
        }

        Self {
            indices,
            states,
            actions,
            next_states,
            rewards,
            dones,
            trajectories,
        }
    }
}

/// Bounded FIFO replay memory.
///
/// Once `capacity` transitions are stored, each new one silently evicts the
/// oldest.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    transitions: VecDeque<Transition>,
}

impl ReplayBuffer {
    /// Creates an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be positive");
        Self {
            capacity,
            transitions: VecDeque::with_capacity(capacity.min(4096)),
        }
    }

    /// Stores a transition, evicting the oldest one when full.
    pub fn add(&mut self, transition: Transition) {
        if self.transitions.len() == self.capacity {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
    }

    /// Number of stored transitions, at most `capacity`.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// `true` before the first `add`.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Maximum number of transitions kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored transitions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    /// Draws `min(batch_size, len)` distinct positions uniformly at random.
    pub fn sample_indices<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<usize> {
        let amount = batch_size.min(self.len());
        rand::seq::index::sample(rng, self.len(), amount).into_vec()
    }

    /// Samples a batch without replacement.
    ///
    /// Requests larger than the buffer are clamped to its length. Asking an
    /// empty buffer for a non-empty batch is an error.
    pub fn sample_batch<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<ReplayBatch, BufferError> {
        if self.is_empty() && batch_size > 0 {
            return Err(BufferError::Empty {
                requested: batch_size,
            });
        }
        let indices = self.sample_indices(batch_size, rng);
        Ok(ReplayBatch::gather(&self.transitions, indices))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn transition(tag: f64) -> Transition {
        Transition::new(vec![tag, 0.0], vec![tag], vec![tag + 1.0, 0.0], tag, false)
    }

    #[test]
    fn fifo_eviction_keeps_most_recent() {
        let mut buf = ReplayBuffer::new(5);
        for i in 0..12 {
            buf.add(transition(i as f64));
        }
        assert_eq!(buf.len(), 5);
        let rewards: Vec<f64> = buf.iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn sampling_has_no_duplicates() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut buf = ReplayBuffer::new(100);
        for i in 0..40 {
            buf.add(transition(i as f64));
        }
        for requested in [1, 10, 40, 64] {
            let batch = buf.sample_batch(requested, &mut rng).unwrap();
            assert_eq!(batch.len(), requested.min(40));
            let unique: HashSet<usize> = batch.indices.iter().copied().collect();
            assert_eq!(unique.len(), batch.len());
            // Distinct rewards confirm distinct source transitions.
            let rewards: HashSet<u64> = batch.rewards.iter().map(|r| r.to_bits()).collect();
            assert_eq!(rewards.len(), batch.len());
        }
    }

    #[test]
    fn batch_rows_match_source_transitions() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut buf = ReplayBuffer::new(10);
        for i in 0..10 {
            buf.add(transition(i as f64));
        }
        let batch = buf.sample_batch(4, &mut rng).unwrap();
        assert_eq!(batch.states.dim(), (4, 2));
        assert_eq!(batch.actions.dim(), (4, 1));
        for (row, &i) in batch.indices.iter().enumerate() {
            assert_eq!(batch.rewards[row], i as f64);
            assert_eq!(batch.states[[row, 0]], i as f64);
            assert_eq!(batch.next_states[[row, 0]], i as f64 + 1.0);
        }
    }

    #[test]
    fn empty_buffer_errors_only_for_nonzero_batch() {
        let mut rng = StdRng::seed_from_u64(0);
        let buf = ReplayBuffer::new(4);
        assert!(matches!(
            buf.sample_batch(8, &mut rng),
            Err(BufferError::Empty { requested: 8 })
        ));
        assert!(buf.sample_batch(0, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn continuation_mask_zeroes_terminal_rows() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut buf = ReplayBuffer::new(2);
        let mut t = transition(1.0);
        t.done = true;
        buf.add(t);
        let batch = buf.sample_batch(1, &mut rng).unwrap();
        assert_eq!(batch.continuation_mask()[0], 0.0);
    }

    #[test]
    fn trajectories_travel_with_transitions() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut buf = ReplayBuffer::new(2);
        let mut traj = Trajectory::default();
        traj.push(vec![0.0, 0.0], vec![0.5]);
        buf.add(transition(0.0).with_trajectory(traj.clone()));
        let batch = buf.sample_batch(1, &mut rng).unwrap();
        assert_eq!(batch.trajectories[0].as_ref(), Some(&traj));
    }
}
