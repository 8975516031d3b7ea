//! Per-episode training metrics and where they go.

use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

/// Summary of one training episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeMetrics {
    pub episode: u64,
    pub steps: u64,
    pub total_steps: u64,
    pub score: f64,
    /// Sum of intrinsic rewards; only reported by hierarchical controllers.
    pub lo_score: Option<f64>,
    /// Mean high-level loss over the episode's high-level updates.
    pub hi_loss: Option<f64>,
    /// Mean low-level (or flat) loss over the episode's updates.
    pub lo_loss: Option<f64>,
    pub exploration_lo: f64,
    pub exploration_hi: Option<f64>,
}

/// Receives one record per finished episode.
pub trait MetricsSink {
    fn record(&mut self, metrics: &EpisodeMetrics) -> io::Result<()>;
}

/// Logs each episode at `info` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&mut self, m: &EpisodeMetrics) -> io::Result<()> {
        info!(
            episode = m.episode,
            steps = m.steps,
            total_steps = m.total_steps,
            score = m.score,
            lo_score = ?m.lo_score,
            hi_loss = ?m.hi_loss,
            lo_loss = ?m.lo_loss,
            exploration_lo = m.exploration_lo,
            exploration_hi = ?m.exploration_hi,
            "episode finished"
        );
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn record(&mut self, metrics: &EpisodeMetrics) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Keeps every record in memory.
impl MetricsSink for Vec<EpisodeMetrics> {
    fn record(&mut self, metrics: &EpisodeMetrics) -> io::Result<()> {
        self.push(metrics.clone());
        Ok(())
    }
}

/// Incremental mean, so episode losses need no per-step storage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    count: u64,
    mean: f64,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }

    pub fn push_opt(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.push(v);
        }
    }

    /// `None` until a value has been pushed.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}
