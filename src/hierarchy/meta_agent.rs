//! Two-level coordinator.
//!
//! Every `horizon` steps the high-level agent looks at the state and emits a
//! goal; in between, the goal is carried along with the goal transition. The
//! low-level agent sees `state ++ goal` and is trained on the intrinsic
//! reward. The environment reward accumulates into one high-level
//! transition per segment, which is handed to the high-level agent (together
//! with the low-level trajectory, for relabeling) when the segment closes.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::config::HierarchyConfig;
use super::goal::GoalSpace;
use super::relabel::OffPolicyCorrection;
use crate::agent::{AgentError, ConfigError, DdpgAgent, ExplorationAdjust};
use crate::buffer::{Trajectory, Transition};
use crate::model::{Mlp, Model};

const HI_DIR: &str = "hi";
const LO_DIR: &str = "lo";

/// A high-level transition under construction.
///
/// Opened when a goal is issued, extended once per low-level step, and
/// closed when the segment ends.
#[derive(Debug, Clone, PartialEq)]
pub struct HighLevelTransition {
    /// State in which the goal was issued.
    pub state: Vec<f64>,
    /// High-level action in `[-1, 1]`, i.e. the normalized goal.
    pub action: Vec<f64>,
    /// Environment reward summed over the segment.
    pub reward: f64,
    pub trajectory: Trajectory,
}

impl HighLevelTransition {
    pub fn begin(state: Vec<f64>, action: Vec<f64>) -> Self {
        Self {
            state,
            action,
            reward: 0.0,
            trajectory: Trajectory::default(),
        }
    }

    pub fn record(&mut self, state: &[f64], action: &[f64], reward: f64) {
        self.trajectory.push(state.to_vec(), action.to_vec());
        self.reward += reward;
    }

    pub fn len(&self) -> usize {
        self.trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectory.is_empty()
    }

    /// Closes the segment into a replay transition carrying its trajectory.
    pub fn finish(self, next_state: &[f64], done: bool) -> Transition {
        Transition::new(self.state, self.action, next_state.to_vec(), self.reward, done)
            .with_trajectory(self.trajectory)
    }
}

/// Hierarchical agent composed of a goal-emitting and a goal-following DDPG agent.
pub struct MetaAgent<M: Model = Mlp> {
    hi_agent: DdpgAgent<M>,
    lo_agent: DdpgAgent<M>,
    goal_space: GoalSpace,
    config: HierarchyConfig,
    clock: usize,
    goal: Vec<f64>,
    pending: Option<HighLevelTransition>,
    relabel_rng: StdRng,
    last_intrinsic_reward: f64,
}

impl<M: Model> MetaAgent<M> {
    /// Creates a trainable hierarchy for the given state and action sizes.
    pub fn new(state_dim: usize, action_dim: usize, config: HierarchyConfig) -> Result<Self, AgentError> {
        config.validate(state_dim)?;
        let goal_space = config.goal_space(state_dim)?;
        let hi_agent = DdpgAgent::new(state_dim, goal_space.dim(), config.hi.clone())?;
        let lo_agent = DdpgAgent::new(state_dim + goal_space.dim(), action_dim, config.lo.clone())?;
        Ok(Self::assemble(hi_agent, lo_agent, goal_space, config))
    }

    /// Restores both agents from `dir/hi` and `dir/lo`. Neither can train
    /// until buffers are attached.
    pub fn load(dir: impl AsRef<Path>, config: HierarchyConfig) -> Result<Self, AgentError> {
        let dir = dir.as_ref();
        let hi_agent: DdpgAgent<M> = DdpgAgent::load(dir.join(HI_DIR), config.hi.clone())?;
        let lo_agent: DdpgAgent<M> = DdpgAgent::load(dir.join(LO_DIR), config.lo.clone())?;
        let state_dim = hi_agent.state_dim();
        config.validate(state_dim)?;
        let goal_space = config.goal_space(state_dim)?;
        if hi_agent.action_dim() != goal_space.dim()
            || lo_agent.state_dim() != state_dim + goal_space.dim()
        {
            return Err(ConfigError::GoalShapeMismatch {
                indices: goal_space.dim(),
                limits: hi_agent.action_dim(),
            }
            .into());
        }
        debug!(dir = %dir.display(), "restored hierarchical agent");
        Ok(Self::assemble(hi_agent, lo_agent, goal_space, config))
    }

    fn assemble(
        hi_agent: DdpgAgent<M>,
        lo_agent: DdpgAgent<M>,
        goal_space: GoalSpace,
        config: HierarchyConfig,
    ) -> Self {
        Self {
            goal: vec![0.0; goal_space.dim()],
            relabel_rng: StdRng::seed_from_u64(config.seed),
            hi_agent,
            lo_agent,
            goal_space,
            config,
            clock: 0,
            pending: None,
            last_intrinsic_reward: 0.0,
        }
    }

    /// Starts a new episode: the next call to [`MetaAgent::act`] issues a goal.
    pub fn reset_clock(&mut self) {
        self.clock = 0;
        self.pending = None;
    }

    /// Chooses a primitive action.
    ///
    /// At the start of a segment the high-level agent issues a fresh goal
    /// first; otherwise the current (already transitioned) goal is used.
    pub fn act(&mut self, state: &[f64], explore: bool) -> Vec<f64> {
        if self.clock == 0 {
            let hi_action = self.hi_agent.act(state, explore);
            self.goal = self.goal_space.scale(&hi_action);
            self.pending = Some(HighLevelTransition::begin(state.to_vec(), hi_action));
        }
        let input = self.goal_space.condition(state, &self.goal);
        self.lo_agent.act(&input, explore)
    }

    /// Learns from one environment step.
    ///
    /// The low-level agent trains every step on the intrinsic reward. When the
    /// segment closes (after `horizon` steps or on `done`) the accumulated
    /// high-level transition is stored and the high-level agent trains,
    /// relabeling its batch if enabled. Returns `(lo_loss, hi_loss)`; the
    /// high-level loss is `None` on steps where it did not train.
    ///
    /// Fails without touching the segment if either level lacks a replay
    /// buffer.
    pub fn train(
        &mut self,
        state: &[f64],
        action: &[f64],
        reward: f64,
        next_state: &[f64],
        done: bool,
    ) -> Result<(Option<f64>, Option<f64>), AgentError> {
        if self.pending.is_none() {
            return Err(AgentError::GoalNotIssued);
        }
        if !self.hi_agent.is_trainable() || !self.lo_agent.is_trainable() {
            return Err(AgentError::MissingReplayBuffer);
        }

        let next_goal = self.goal_space.transition(&self.goal, state, next_state);
        let intrinsic = self.goal_space.intrinsic_reward(&self.goal, state, next_state);
        let lo_transition = Transition::new(
            self.goal_space.condition(state, &self.goal),
            action.to_vec(),
            self.goal_space.condition(next_state, &next_goal),
            intrinsic,
            done,
        );
        let lo_loss = self.lo_agent.train(lo_transition)?;
        self.last_intrinsic_reward = intrinsic;

        if let Some(pending) = self.pending.as_mut() {
            pending.record(state, action, reward);
        }
        self.goal = next_goal;
        self.clock += 1;

        let mut hi_loss = None;
        if self.clock >= self.config.horizon || done {
            if let Some(pending) = self.pending.take() {
                hi_loss = self.train_hi(pending.finish(next_state, done))?;
            }
            self.clock = 0;
        }
        Ok((lo_loss, hi_loss))
    }

    fn train_hi(&mut self, transition: Transition) -> Result<Option<f64>, AgentError> {
        if !self.config.relabel {
            return self.hi_agent.train(transition);
        }
        let mut correction = OffPolicyCorrection::new(
            &self.lo_agent,
            &self.goal_space,
            &mut self.relabel_rng,
            self.config.relabel_samples,
            self.config.relabel_sigma,
        );
        self.hi_agent.train_corrected(transition, &mut correction)
    }

    /// Moves the goal and clock forward without learning.
    ///
    /// Use in place of [`MetaAgent::train`] when only acting.
    pub fn advance(&mut self, state: &[f64], next_state: &[f64]) {
        self.goal = self.goal_space.transition(&self.goal, state, next_state);
        self.clock += 1;
        if self.clock >= self.config.horizon {
            self.clock = 0;
            self.pending = None;
        }
    }

    /// Applies the same exploration change to both levels.
    pub fn modify_exploration(&mut self, adjust: ExplorationAdjust) {
        self.hi_agent.modify_exploration(adjust);
        self.lo_agent.modify_exploration(adjust);
    }

    /// Saves the high- and low-level agents under `dir/hi` and `dir/lo`.
    pub fn save_model(&self, dir: impl AsRef<Path>) -> Result<(), AgentError> {
        let dir = dir.as_ref();
        self.hi_agent.save(dir.join(HI_DIR))?;
        self.lo_agent.save(dir.join(LO_DIR))
    }

    /// The active goal, as a displacement in the goal subspace.
    pub fn goal(&self) -> &[f64] {
        &self.goal
    }

    /// Absolute target the low-level agent is steering toward.
    pub fn goal_state(&self, state: &[f64]) -> Vec<f64> {
        self.goal_space
            .project(state)
            .iter()
            .zip(&self.goal)
            .map(|(s, g)| s + g)
            .collect()
    }

    pub fn clock(&self) -> usize {
        self.clock
    }

    /// Low-level steps recorded in the open segment.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, HighLevelTransition::len)
    }

    pub fn last_intrinsic_reward(&self) -> f64 {
        self.last_intrinsic_reward
    }

    pub fn hi_agent(&self) -> &DdpgAgent<M> {
        &self.hi_agent
    }

    pub fn lo_agent(&self) -> &DdpgAgent<M> {
        &self.lo_agent
    }

    pub fn hi_agent_mut(&mut self) -> &mut DdpgAgent<M> {
        &mut self.hi_agent
    }

    pub fn lo_agent_mut(&mut self) -> &mut DdpgAgent<M> {
        &mut self.lo_agent
    }

    pub fn goal_space(&self) -> &GoalSpace {
        &self.goal_space
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }
}
