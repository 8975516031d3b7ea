//! Hierarchical control with temporal abstraction.
//!
//! - [`GoalSpace`]: goal transition and intrinsic reward.
//! - [`OffPolicyCorrection`]: relabels stale high-level goals.
//! - [`MetaAgent`]: runs a high-level and a low-level [`DdpgAgent`](crate::agent::DdpgAgent)
//!   on a fixed cadence.

pub mod config;
pub mod goal;
pub mod meta_agent;
pub mod relabel;


pub use config::HierarchyConfig;
pub use goal::GoalSpace;
pub use meta_agent::{HighLevelTransition, MetaAgent};
pub use relabel::OffPolicyCorrection;
