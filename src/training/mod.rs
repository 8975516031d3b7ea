//! Training runtime: environments, the episode loop, runtime commands and
//! metrics.

pub mod command;
pub mod controller;
pub mod environment;
pub mod metrics;
pub mod session;

pub use command::{ChannelCommands, Command, CommandSource, NoCommands, StdinCommands, UnknownCommand};
pub use controller::{Controller, ExplorationReport, StepLosses};
pub use environment::{Environment, PointMass, StepResult};
pub use metrics::{EpisodeMetrics, JsonLinesSink, MetricsSink, RunningMean, TracingSink};
pub use session::{
    evaluate, RunState, SessionConfig, SessionError, SessionSummary, StopReason, TrainingSession,
};
