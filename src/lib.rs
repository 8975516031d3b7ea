//! hierarchical-ddpg - Deep Deterministic Policy Gradient with a two-level
//! goal hierarchy
//!
//! A continuous-control reinforcement learning library: experience replay,
//! actor-critic agents, a goal-conditioned high/low-level coordinator with
//! off-policy goal relabeling, and a training loop around them.

pub mod agent;
pub mod buffer;
pub mod hierarchy;
pub mod model;
pub mod space;
pub mod training;

pub use agent::{AgentError, DdpgAgent, DdpgConfig, ExplorationAdjust};
pub use buffer::{ReplayBuffer, Transition};
pub use hierarchy::{HierarchyConfig, MetaAgent};
pub use space::BoxSpace;
