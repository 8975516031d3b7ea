use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("I/O error while persisting model: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model artifact could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("Parameter count mismatch: expected {expected}, got {actual}")]
    ParameterCount { expected: usize, actual: usize },

    #[cfg(feature = "libtorch")]
    #[error("libtorch error: {0}")]
    Torch(#[from] tch::TchError),
}
