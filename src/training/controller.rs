//! Uniform driving interface over flat and hierarchical agents.

use std::path::Path;

use crate::agent::{AgentError, DdpgAgent, ExplorationAdjust};
use crate::buffer::Transition;
use crate::hierarchy::MetaAgent;
use crate::model::Model;

/// Losses reported by one training step. `None` means no update was made.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub lo: Option<f64>,
    /// Only hierarchical controllers report a high-level loss.
    pub hi: Option<f64>,
}

/// Current exploration magnitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplorationReport {
    pub lo: f64,
    pub hi: Option<f64>,
}

/// Something the training loop can drive.
///
/// Actions are always exchanged in `[-1, 1]`; the loop scales them to the
/// environment's action space.
pub trait Controller {
    /// Called once before the first step of every episode.
    fn begin_episode(&mut self);

    fn act(&mut self, state: &[f64], explore: bool) -> Vec<f64>;

    /// Advances internal state after a step that is not learned from.
    fn observe(&mut self, state: &[f64], next_state: &[f64]);

    fn train(
        &mut self,
        state: &[f64],
        action: &[f64],
        reward: f64,
        next_state: &[f64],
        done: bool,
    ) -> Result<StepLosses, AgentError>;

    fn exploration(&self) -> ExplorationReport;

    fn adjust_exploration(&mut self, adjust: ExplorationAdjust);

    fn save(&self, dir: &Path) -> Result<(), AgentError>;

    /// Absolute target currently pursued, for rendering.
    fn goal_state(&self, _state: &[f64]) -> Option<Vec<f64>> {
        None
    }

    /// Intrinsic reward earned by the last training step, if the controller
    /// has one.
    fn intrinsic_reward(&self) -> Option<f64> {
        None
    }
}

impl<M: Model> Controller for DdpgAgent<M> {
    fn begin_episode(&mut self) {}

    fn act(&mut self, state: &[f64], explore: bool) -> Vec<f64> {
        DdpgAgent::act(self, state, explore)
    }

    fn observe(&mut self, _state: &[f64], _next_state: &[f64]) {}

    fn train(
        &mut self,
        state: &[f64],
        action: &[f64],
        reward: f64,
        next_state: &[f64],
        done: bool,
    ) -> Result<StepLosses, AgentError> {
        let transition = Transition::new(
            state.to_vec(),
            action.to_vec(),
            next_state.to_vec(),
            reward,
            done,
        );
        let lo = DdpgAgent::train(self, transition)?;
        Ok(StepLosses { lo, hi: None })
    }

    fn exploration(&self) -> ExplorationReport {
        ExplorationReport {
            lo: self.exploration_magnitude(),
            hi: None,
        }
    }

    fn adjust_exploration(&mut self, adjust: ExplorationAdjust) {
        self.modify_exploration(adjust);
    }

    fn save(&self, dir: &Path) -> Result<(), AgentError> {
        DdpgAgent::save(self, dir)
    }
}

impl<M: Model> Controller for MetaAgent<M> {
    fn begin_episode(&mut self) {
        self.reset_clock();
    }

    fn act(&mut self, state: &[f64], explore: bool) -> Vec<f64> {
        MetaAgent::act(self, state, explore)
    }

    fn observe(&mut self, state: &[f64], next_state: &[f64]) {
        self.advance(state, next_state);
    }

    fn train(
        &mut self,
        state: &[f64],
        action: &[f64],
        reward: f64,
        next_state: &[f64],
        done: bool,
    ) -> Result<StepLosses, AgentError> {
        let (lo, hi) = MetaAgent::train(self, state, action, reward, next_state, done)?;
        Ok(StepLosses { lo, hi })
    }

    fn exploration(&self) -> ExplorationReport {
        ExplorationReport {
            lo: self.lo_agent().exploration_magnitude(),
            hi: Some(self.hi_agent().exploration_magnitude()),
        }
    }

    fn adjust_exploration(&mut self, adjust: ExplorationAdjust) {
        self.modify_exploration(adjust);
    }

    fn save(&self, dir: &Path) -> Result<(), AgentError> {
        self.save_model(dir)
    }

    fn goal_state(&self, state: &[f64]) -> Option<Vec<f64>> {
        Some(MetaAgent::goal_state(self, state))
    }

    fn intrinsic_reward(&self) -> Option<f64> {
        Some(self.last_intrinsic_reward())
    }
}
