use std::path::PathBuf;

use thiserror::Error;

use super::config::ConfigError;
use crate::buffer::BufferError;
use crate::model::ModelError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Cannot train a restored agent: no replay buffer attached")]
    MissingReplayBuffer,

    #[error("No saved models found at {0}")]
    ModelDirMissing(PathBuf),

    #[error("train() called before act() issued a goal for this segment")]
    GoalNotIssued,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Batch shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
