//! Configuration of the two-level hierarchy.

use serde::{Deserialize, Serialize};

use super::goal::GoalSpace;
use crate::agent::config::check;
use crate::agent::{ConfigError, DdpgConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Low-level steps per high-level decision (c).
    pub horizon: usize,
    /// Relabel sampled high-level goals against the current low-level policy.
    pub relabel: bool,
    /// Gaussian candidates drawn around the achieved displacement.
    pub relabel_samples: usize,
    /// Candidate noise, as a fraction of each goal limit.
    pub relabel_sigma: f64,
    /// State components goals refer to; `None` means the whole state.
    pub goal_indices: Option<Vec<usize>>,
    /// Symmetric goal bounds, one per goal component; empty means `1.0` each.
    pub goal_limits: Vec<f64>,
    pub hi: DdpgConfig,
    pub lo: DdpgConfig,
    /// Seed of the relabeling noise.
    pub seed: u64,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            horizon: 10,
            relabel: true,
            relabel_samples: 8,
            relabel_sigma: 0.5,
            goal_indices: None,
            goal_limits: Vec::new(),
            hi: DdpgConfig {
                seed: 0,
                ..DdpgConfig::default()
            },
            lo: DdpgConfig {
                seed: 1,
                ..DdpgConfig::default()
            },
            seed: 2,
        }
    }
}

impl HierarchyConfig {
    /// Builds the goal space for a `state_dim`-dimensional environment.
    pub fn goal_space(&self, state_dim: usize) -> Result<GoalSpace, ConfigError> {
        let indices = self
            .goal_indices
            .clone()
            .unwrap_or_else(|| (0..state_dim).collect());
        let limits = if self.goal_limits.is_empty() {
            vec![1.0; indices.len()]
        } else {
            self.goal_limits.clone()
        };
        GoalSpace::new(state_dim, indices, &limits)
    }

    pub fn validate(&self, state_dim: usize) -> Result<(), ConfigError> {
        check("horizon", self.horizon as f64, ">= 1", |v| v >= 1.0)?;
        check("relabel_sigma", self.relabel_sigma, ">= 0", |v| v >= 0.0)?;
        self.hi.validate()?;
        self.lo.validate()?;
        self.goal_space(state_dim).map(|_| ())
    }
}
