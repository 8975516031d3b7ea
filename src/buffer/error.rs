use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Cannot sample {requested} transitions: replay buffer is empty")]
    Empty { requested: usize },
}
