//! Actor-critic agents.
//!
//! [`DdpgAgent`] implements the DDPG update rule over any [`Model`](crate::model::Model)
//! backend. Two small traits sit at its seams:
//! - [`ActionLikelihood`]: read-only access to "how likely is this action
//!   under the current policy", used by off-policy goal relabeling.
//! - [`BatchCorrection`]: a hook that may rewrite a sampled batch before the
//!   update, which is where relabeling plugs in.

pub mod config;
pub mod ddpg;
pub mod error;

use ndarray::ArrayView2;

use crate::buffer::ReplayBatch;

pub use config::{ConfigError, DdpgConfig};
pub use ddpg::DdpgAgent;
pub use error::AgentError;

/// Log-likelihood of actions under a policy.
pub trait ActionLikelihood {
    /// Sum over rows of `log π(actions[i] | states[i])`, up to a constant
    /// that is the same for every call.
    fn log_likelihood(&self, states: ArrayView2<f64>, actions: ArrayView2<f64>) -> f64;
}

/// Rewrites a sampled batch in place before it is used for an update.
pub trait BatchCorrection {
    fn correct(&mut self, batch: &mut ReplayBatch);
}

/// Runtime change to an agent's exploration magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExplorationAdjust {
    /// Add the (possibly negative) delta.
    Increment(f64),
    /// Replace the magnitude.
    Assign(f64),
}
