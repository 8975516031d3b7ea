//! Episode loop for training a [`Controller`] in an [`Environment`].

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::command::{Command, CommandSource};
use super::controller::Controller;
use super::environment::Environment;
use super::metrics::{EpisodeMetrics, MetricsSink, RunningMean};
use crate::agent::config::check;
use crate::agent::{AgentError, ConfigError, ExplorationAdjust};

/// Fraction of the solved score that triggers an evaluation run.
const EVALUATION_TRIGGER: f64 = 0.8;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Failed to record metrics: {0}")]
    Metrics(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Environment steps to train for; adjustable at runtime.
    pub step_budget: u64,
    /// Episodes are cut (and treated as terminal) after this many steps.
    pub max_steps_per_episode: u64,
    pub models_dir: PathBuf,
    /// Save every this many episodes; `0` disables periodic saves.
    pub save_every_episodes: u64,
    /// Budget change applied by [`Command::ExtendRun`] and [`Command::ShortenRun`].
    pub budget_step: u64,
    /// Exploration change applied by the increase/decrease commands.
    pub exploration_step: f64,
    /// Score every evaluation episode must exceed for the task to count as
    /// solved. When set, episodes scoring above 80% of it trigger a greedy
    /// evaluation.
    pub solved_score: Option<f64>,
    pub evaluation_episodes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            step_budget: 1_000_000,
            max_steps_per_episode: 2000,
            models_dir: PathBuf::from("saved_models"),
            save_every_episodes: 100,
            budget_step: 50_000,
            exploration_step: 0.1,
            solved_score: None,
            evaluation_episodes: 100,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            "max_steps_per_episode",
            self.max_steps_per_episode as f64,
            ">= 1",
            |v| v >= 1.0,
        )?;
        check("exploration_step", self.exploration_step, ">= 0", |v| v >= 0.0)?;
        if let Some(score) = self.solved_score {
            check("solved_score", score, "finite", |_| true)?;
            check(
                "evaluation_episodes",
                self.evaluation_episodes as f64,
                ">= 1",
                |v| v >= 1.0,
            )?;
        }
        Ok(())
    }
}

/// Mutable run state, changed by the loop and by runtime commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub total_steps: u64,
    pub episode: u64,
    pub step_budget: u64,
    pub render: bool,
    pub quit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BudgetExhausted,
    Quit,
    Solved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub episodes: u64,
    pub total_steps: u64,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

impl SessionSummary {
    pub fn steps_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_steps as f64 / secs
        } else {
            0.0
        }
    }
}

/// Drives training episodes until the step budget is spent, a quit command
/// arrives, or the task is solved.
///
/// # Lifecycle
///
/// 1. Create with [`TrainingSession::new`].
/// 2. Call [`TrainingSession::run`] with an environment, a controller, a
///    command source and a metrics sink.
/// 3. Models are saved periodically, before each evaluation and once when
///    the run ends (including on quit).
#[derive(Debug)]
pub struct TrainingSession {
    config: SessionConfig,
    state: RunState,
}

impl TrainingSession {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            state: RunState {
                step_budget: config.step_budget,
                ..RunState::default()
            },
            config,
        })
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.state.render = render;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn run_state(&self) -> &RunState {
        &self.state
    }

    pub fn run<E, C>(
        &mut self,
        env: &mut E,
        controller: &mut C,
        commands: &mut dyn CommandSource,
        sink: &mut dyn MetricsSink,
    ) -> Result<SessionSummary, SessionError>
    where
        E: Environment + ?Sized,
        C: Controller + ?Sized,
    {
        let started = Instant::now();
        let mut stop_reason = StopReason::BudgetExhausted;

        while self.state.total_steps < self.state.step_budget {
            let metrics = self.run_episode(env, controller, commands)?;
            sink.record(&metrics).map_err(SessionError::Metrics)?;

            if self.state.quit {
                stop_reason = StopReason::Quit;
                break;
            }
            if self.config.save_every_episodes > 0
                && self.state.episode % self.config.save_every_episodes == 0
            {
                controller.save(&self.config.models_dir)?;
            }
            if self.check_solved(env, controller, metrics.score)? {
                stop_reason = StopReason::Solved;
                break;
            }
        }

        controller.save(&self.config.models_dir)?;
        let summary = SessionSummary {
            episodes: self.state.episode,
            total_steps: self.state.total_steps,
            stop_reason,
            elapsed: started.elapsed(),
        };
        info!(
            episodes = summary.episodes,
            total_steps = summary.total_steps,
            reason = ?summary.stop_reason,
            elapsed = ?summary.elapsed,
            steps_per_second = summary.steps_per_second(),
            "training finished"
        );
        Ok(summary)
    }

    fn run_episode<E, C>(
        &mut self,
        env: &mut E,
        controller: &mut C,
        commands: &mut dyn CommandSource,
    ) -> Result<EpisodeMetrics, SessionError>
    where
        E: Environment + ?Sized,
        C: Controller + ?Sized,
    {
        self.state.episode += 1;
        let mut state = env.reset();
        controller.begin_episode();

        let mut steps = 0u64;
        let mut score = 0.0;
        let mut lo_loss = RunningMean::default();
        let mut hi_loss = RunningMean::default();
        let mut lo_score: Option<f64> = None;

        loop {
            if self.state.render {
                env.render(controller.goal_state(&state).as_deref());
            }
            let action = controller.act(&state, true);
            let scaled = env.action_space().scale(&action);
            let result = env.step(&scaled);
            steps += 1;
            self.state.total_steps += 1;

            let done = result.done || steps >= self.config.max_steps_per_episode;
            let losses = controller.train(&state, &action, result.reward, &result.next_state, done)?;
            lo_loss.push_opt(losses.lo);
            hi_loss.push_opt(losses.hi);
            if let Some(intrinsic) = controller.intrinsic_reward() {
                *lo_score.get_or_insert(0.0) += intrinsic;
            }
            score += result.reward;
            state = result.next_state;

            for command in commands.poll() {
                self.apply(command, controller);
            }
            if done || self.state.quit {
                break;
            }
        }

        let exploration = controller.exploration();
        Ok(EpisodeMetrics {
            episode: self.state.episode,
            steps,
            total_steps: self.state.total_steps,
            score,
            lo_score,
            hi_loss: hi_loss.mean(),
            lo_loss: lo_loss.mean(),
            exploration_lo: exploration.lo,
            exploration_hi: exploration.hi,
        })
    }

    /// Applies a runtime command to the run state or the controller.
    pub fn apply<C: Controller + ?Sized>(&mut self, command: Command, controller: &mut C) {
        let step = self.config.exploration_step;
        match command {
            Command::ToggleRender => self.state.render = !self.state.render,
            Command::SaveAndQuit => self.state.quit = true,
            Command::ExtendRun => self.state.step_budget += self.config.budget_step,
            Command::ShortenRun => {
                self.state.step_budget = self.state.step_budget.saturating_sub(self.config.budget_step)
            }
            Command::IncreaseExploration => {
                controller.adjust_exploration(ExplorationAdjust::Increment(step))
            }
            Command::DecreaseExploration => {
                controller.adjust_exploration(ExplorationAdjust::Increment(-step))
            }
            Command::ZeroExploration => controller.adjust_exploration(ExplorationAdjust::Assign(0.0)),
        }
        info!(
            ?command,
            step_budget = self.state.step_budget,
            render = self.state.render,
            "command applied"
        );
    }

    fn check_solved<E, C>(&self, env: &mut E, controller: &mut C, score: f64) -> Result<bool, SessionError>
    where
        E: Environment + ?Sized,
        C: Controller + ?Sized,
    {
        let Some(solved) = self.config.solved_score else {
            return Ok(false);
        };
        if score <= EVALUATION_TRIGGER * solved {
            return Ok(false);
        }
        controller.save(&self.config.models_dir)?;
        let scores = evaluate(
            env,
            controller,
            self.config.evaluation_episodes,
            self.config.max_steps_per_episode,
        );
        let mean = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
        let failed = scores.iter().filter(|&&s| s <= solved).count();
        let passed = failed == 0;
        info!(
            mean_score = mean,
            solved,
            failed,
            episodes = scores.len(),
            passed,
            "evaluation finished"
        );
        Ok(passed)
    }
}

/// Runs `episodes` greedy episodes and returns their scores.
///
/// Controllers are advanced with [`Controller::observe`], so nothing is
/// learned.
pub fn evaluate<E, C>(env: &mut E, controller: &mut C, episodes: usize, max_steps: u64) -> Vec<f64>
where
    E: Environment + ?Sized,
    C: Controller + ?Sized,
{
    let mut scores = Vec::with_capacity(episodes);
    for episode in 0..episodes {
        let mut state = env.reset();
        controller.begin_episode();
        let mut score = 0.0;
        let mut steps = 0;
        while steps < max_steps {
            let action = controller.act(&state, false);
            let scaled = env.action_space().scale(&action);
            let result = env.step(&scaled);
            controller.observe(&state, &result.next_state);
            score += result.reward;
            steps += 1;
            state = result.next_state;
            if result.done {
                break;
            }
        }
        debug!(episode, score, steps, "evaluation episode");
        scores.push(score);
    }
    scores
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::agent::{DdpgAgent, DdpgConfig};
    use crate::hierarchy::{HierarchyConfig, MetaAgent};
    use crate::space::BoxSpace;
    use crate::training::command::{ChannelCommands, NoCommands};
    use crate::training::environment::{PointMass, StepResult};

    /// Reward 1 per step; episode lengths cycle through `lengths`.
    struct FixedLength {
        lengths: Vec<u64>,
        episodes: usize,
        length: u64,
        t: u64,
        space: BoxSpace,
    }

    impl FixedLength {
        fn new(length: u64) -> Self {
            Self::cycling(vec![length])
        }

        fn cycling(lengths: Vec<u64>) -> Self {
            Self {
                length: lengths[0],
                lengths,
                episodes: 0,
                t: 0,
                space: BoxSpace::unit(2),
            }
        }
    }

    /// Flat agent that counts how often it is saved.
    struct CountingSaves {
        agent: DdpgAgent,
        saves: std::cell::Cell<usize>,
    }

    impl Controller for CountingSaves {
        fn begin_episode(&mut self) {}

        fn act(&mut self, state: &[f64], explore: bool) -> Vec<f64> {
            self.agent.act(state, explore)
        }

        fn observe(&mut self, _state: &[f64], _next_state: &[f64]) {}

        fn train(
            &mut self,
            state: &[f64],
            action: &[f64],
            reward: f64,
            next_state: &[f64],
            done: bool,
        ) -> Result<crate::training::StepLosses, AgentError> {
            Controller::train(&mut self.agent, state, action, reward, next_state, done)
        }

        fn exploration(&self) -> crate::training::ExplorationReport {
            Controller::exploration(&self.agent)
        }

        fn adjust_exploration(&mut self, adjust: ExplorationAdjust) {
            self.agent.modify_exploration(adjust);
        }

        fn save(&self, dir: &std::path::Path) -> Result<(), AgentError> {
            self.saves.set(self.saves.get() + 1);
            self.agent.save(dir)
        }
    }

    impl Environment for FixedLength {
        fn observation_space(&self) -> &BoxSpace {
            &self.space
        }

        fn action_space(&self) -> &BoxSpace {
            &self.space
        }

        fn reset(&mut self) -> Vec<f64> {
            self.length = self.lengths[self.episodes % self.lengths.len()];
            self.episodes += 1;
            self.t = 0;
            vec![0.0, 0.0]
        }

        fn step(&mut self, action: &[f64]) -> StepResult {
            self.t += 1;
            StepResult {
                next_state: vec![action[0] * 0.1, self.t as f64 / self.length as f64],
                reward: 1.0,
                done: self.t >= self.length,
                info: BTreeMap::new(),
            }
        }
    }

    fn small_agent() -> DdpgAgent {
        DdpgAgent::new(
            2,
            2,
            DdpgConfig {
                hidden_units: vec![8],
                batch_size: 4,
                buffer_capacity: 64,
                ..DdpgConfig::default()
            },
        )
        .unwrap()
    }

    fn session_config(dir: &std::path::Path) -> SessionConfig {
        SessionConfig {
            step_budget: 25,
            max_steps_per_episode: 100,
            models_dir: dir.to_path_buf(),
            save_every_episodes: 0,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn runs_until_step_budget_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TrainingSession::new(session_config(dir.path())).unwrap();
        let mut env = FixedLength::new(10);
        let mut agent = small_agent();
        let mut sink: Vec<EpisodeMetrics> = Vec::new();

        let summary = session
            .run(&mut env, &mut agent, &mut NoCommands, &mut sink)
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::BudgetExhausted);
        // Whole episodes only: the budget is checked between episodes.
        assert_eq!(summary.episodes, 3);
        assert_eq!(summary.total_steps, 30);
        assert_eq!(sink.len(), 3);
        assert!(sink.iter().all(|m| m.score == 10.0 && m.lo_loss.is_some()));
        assert!(sink.iter().all(|m| m.lo_score.is_none()));
        assert!(dir.path().join("actor_behaviour.json").exists());
    }

    #[test]
    fn step_limit_truncates_episode() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            max_steps_per_episode: 4,
            step_budget: 8,
            ..session_config(dir.path())
        };
        let mut session = TrainingSession::new(config).unwrap();
        let mut env = FixedLength::new(1000);
        let mut agent = small_agent();
        let mut sink: Vec<EpisodeMetrics> = Vec::new();

        session
            .run(&mut env, &mut agent, &mut NoCommands, &mut sink)
            .unwrap();
        assert_eq!(sink.iter().map(|m| m.steps).collect::<Vec<_>>(), vec![4, 4]);
        // Truncated steps are stored as terminal.
        let terminal = agent.buffer().unwrap().iter().filter(|t| t.done).count();
        assert_eq!(terminal, 2);
    }

    #[test]
    fn quit_command_saves_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TrainingSession::new(session_config(dir.path())).unwrap();
        let mut env = FixedLength::new(10);
        let mut controller = CountingSaves {
            agent: small_agent(),
            saves: std::cell::Cell::new(0),
        };
        let (tx, mut commands) = ChannelCommands::channel();
        tx.send("q".to_string()).unwrap();
        let mut sink: Vec<EpisodeMetrics> = Vec::new();

        let summary = session
            .run(&mut env, &mut controller, &mut commands, &mut sink)
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Quit);
        assert_eq!(summary.total_steps, 1);
        assert_eq!(controller.saves.get(), 1);
        assert!(dir.path().join("critic_target.json").exists());
    }

    #[test]
    fn commands_adjust_run_state_and_exploration() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TrainingSession::new(session_config(dir.path())).unwrap();
        let mut agent = small_agent();

        session.apply(Command::ExtendRun, &mut agent);
        assert_eq!(session.run_state().step_budget, 50_025);
        session.apply(Command::ShortenRun, &mut agent);
        session.apply(Command::ShortenRun, &mut agent);
        assert_eq!(session.run_state().step_budget, 0);

        session.apply(Command::ToggleRender, &mut agent);
        assert!(session.run_state().render);

        session.apply(Command::IncreaseExploration, &mut agent);
        assert!((agent.exploration_magnitude() - 0.6).abs() < 1e-12);
        session.apply(Command::DecreaseExploration, &mut agent);
        assert!((agent.exploration_magnitude() - 0.5).abs() < 1e-12);
        session.apply(Command::ZeroExploration, &mut agent);
        assert_eq!(agent.exploration_magnitude(), 0.0);
    }

    #[test]
    fn solved_score_stops_after_passing_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            solved_score: Some(9.0),
            evaluation_episodes: 3,
            ..session_config(dir.path())
        };
        let mut session = TrainingSession::new(config).unwrap();
        let mut env = FixedLength::new(10);
        let mut agent = small_agent();
        let mut sink: Vec<EpisodeMetrics> = Vec::new();

        let summary = session
            .run(&mut env, &mut agent, &mut NoCommands, &mut sink)
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Solved);
        assert_eq!(summary.episodes, 1);
    }

    #[test]
    fn solved_requires_every_evaluation_episode() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            solved_score: Some(5.0),
            evaluation_episodes: 4,
            step_budget: 12,
            ..session_config(dir.path())
        };
        let mut session = TrainingSession::new(config).unwrap();
        // Training episode scores 10; evaluation then scores 2, 10, 2, 10
        // (mean 6, but half the episodes fall short).
        let mut env = FixedLength::cycling(vec![10, 2]);
        let mut agent = small_agent();
        let mut sink: Vec<EpisodeMetrics> = Vec::new();

        let summary = session
            .run(&mut env, &mut agent, &mut NoCommands, &mut sink)
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(summary.episodes, 2);
        assert_eq!(
            sink.iter().map(|m| m.score).collect::<Vec<_>>(),
            vec![10.0, 2.0]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SessionConfig {
            max_steps_per_episode: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            TrainingSession::new(config),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn evaluate_is_greedy_and_does_not_learn() {
        let mut env = FixedLength::new(5);
        let mut agent = small_agent();
        let exploration = agent.exploration_magnitude();
        let scores = evaluate(&mut env, &mut agent, 4, 3);
        assert_eq!(scores, vec![3.0; 4]);
        assert_eq!(agent.exploration_magnitude(), exploration);
        assert_eq!(agent.train_steps(), 0);
        assert!(agent.buffer().unwrap().is_empty());
    }

    #[test]
    fn hierarchical_training_on_point_mass() {
        let dir = tempfile::tempdir().unwrap();
        let config = HierarchyConfig {
            horizon: 5,
            goal_limits: vec![0.5, 0.5],
            hi: DdpgConfig {
                hidden_units: vec![8],
                batch_size: 4,
                seed: 3,
                ..DdpgConfig::default()
            },
            lo: DdpgConfig {
                hidden_units: vec![8],
                batch_size: 4,
                seed: 4,
                ..DdpgConfig::default()
            },
            ..HierarchyConfig::default()
        };
        let mut agent: MetaAgent = MetaAgent::new(2, 2, config).unwrap();
        let mut env = PointMass::new(2, 9).with_tolerance(0.0);
        let session_config = SessionConfig {
            step_budget: 40,
            max_steps_per_episode: 20,
            ..session_config(dir.path())
        };
        let mut session = TrainingSession::new(session_config).unwrap();
        let mut sink: Vec<EpisodeMetrics> = Vec::new();

        let summary = session
            .run(&mut env, &mut agent, &mut NoCommands, &mut sink)
            .unwrap();
        assert_eq!(summary.total_steps, 40);
        assert_eq!(sink.len(), 2);
        assert!(sink.iter().all(|m| m.hi_loss.is_some() && m.exploration_hi.is_some()));
        // Intrinsic rewards are non-positive distances, summed per episode.
        assert!(sink
            .iter()
            .all(|m| m.lo_score.map_or(false, |s| s.is_finite() && s <= 0.0)));
        assert_eq!(agent.hi_agent().train_steps(), 8);
        assert!(dir.path().join("hi").join("actor_target.json").exists());
        assert!(dir.path().join("lo").join("actor_target.json").exists());
    }
}
