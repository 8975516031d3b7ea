//! Deep Deterministic Policy Gradient agent.
//!
//! Holds a behaviour and a target copy of both the actor and the critic.
//! Behaviour networks learn by gradient descent; target networks only ever
//! move by soft updates toward their behaviour counterparts.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{aview1, concatenate, s, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info};

use super::config::DdpgConfig;
use super::error::AgentError;
use super::{ActionLikelihood, BatchCorrection, ExplorationAdjust};
use crate::buffer::{ReplayBatch, ReplayBuffer, Transition};
use crate::model::{soft_update, Mlp, Model, NetworkSpec};

const ACTOR_BEHAVIOUR: &str = "actor_behaviour";
const ACTOR_TARGET: &str = "actor_target";
const CRITIC_BEHAVIOUR: &str = "critic_behaviour";
const CRITIC_TARGET: &str = "critic_target";

/// Actor-critic agent with deterministic policy and Gaussian exploration.
///
/// Actions live in `[-1, 1]^action_dim`; scaling to an environment's real
/// bounds is the caller's job (see [`BoxSpace::scale`](crate::space::BoxSpace::scale)).
pub struct DdpgAgent<M: Model = Mlp> {
    state_dim: usize,
    action_dim: usize,
    actor_behaviour: M,
    actor_target: M,
    critic_behaviour: M,
    critic_target: M,
    /// `None` for agents restored from disk.
    replay_buffer: Option<ReplayBuffer>,
    config: DdpgConfig,
    exploration: f64,
    rng: StdRng,
    train_steps: u64,
}

impl<M: Model> DdpgAgent<M> {
    /// Creates a trainable agent with fresh networks and an empty buffer.
    ///
    /// Target networks start as exact copies of the behaviour networks.
    pub fn new(state_dim: usize, action_dim: usize, config: DdpgConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let actor_behaviour = M::new(
            &NetworkSpec::actor(
                state_dim,
                action_dim,
                &config.hidden_units,
                config.learning_rate_actor,
            ),
            config.seed,
        );
        let critic_behaviour = M::new(
            &NetworkSpec::critic(
                state_dim,
                action_dim,
                &config.hidden_units,
                config.learning_rate_critic,
            ),
            config.seed.wrapping_add(1),
        );
        let actor_target = actor_behaviour.duplicate();
        let critic_target = critic_behaviour.duplicate();

        Ok(Self {
            state_dim,
            action_dim,
            actor_behaviour,
            actor_target,
            critic_behaviour,
            critic_target,
            replay_buffer: Some(ReplayBuffer::new(config.buffer_capacity)),
            exploration: config.exploration_magnitude,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(2)),
            config,
            train_steps: 0,
        })
    }

    /// Restores the four networks saved by [`DdpgAgent::save`].
    ///
    /// The restored agent has no replay buffer and cannot train until
    /// [`DdpgAgent::attach_buffer`] is called.
    pub fn load(dir: impl AsRef<Path>, config: DdpgConfig) -> Result<Self, AgentError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(AgentError::ModelDirMissing(dir.to_path_buf()));
        }
        config.validate()?;
        let actor_behaviour = M::load(&artifact::<M>(dir, ACTOR_BEHAVIOUR))?;
        let actor_target = M::load(&artifact::<M>(dir, ACTOR_TARGET))?;
        let critic_behaviour = M::load(&artifact::<M>(dir, CRITIC_BEHAVIOUR))?;
        let critic_target = M::load(&artifact::<M>(dir, CRITIC_TARGET))?;
        debug!(dir = %dir.display(), "restored agent models");

        Ok(Self {
            state_dim: actor_behaviour.spec().input_dim,
            action_dim: actor_behaviour.spec().output_dim,
            actor_behaviour,
            actor_target,
            critic_behaviour,
            critic_target,
            replay_buffer: None,
            exploration: config.exploration_magnitude,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(2)),
            config,
            train_steps: 0,
        })
    }

    /// Persists all four networks under `dir`, creating it if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), AgentError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(crate::model::ModelError::from)?;
        self.actor_behaviour.save(&artifact::<M>(dir, ACTOR_BEHAVIOUR))?;
        self.actor_target.save(&artifact::<M>(dir, ACTOR_TARGET))?;
        self.critic_behaviour.save(&artifact::<M>(dir, CRITIC_BEHAVIOUR))?;
        self.critic_target.save(&artifact::<M>(dir, CRITIC_TARGET))?;
        info!(dir = %dir.display(), "models saved");
        Ok(())
    }

    /// Re-enables training by giving the agent a (fresh) replay buffer.
    pub fn attach_buffer(&mut self, buffer: ReplayBuffer) {
        self.replay_buffer = Some(buffer);
    }

    pub fn is_trainable(&self) -> bool {
        self.replay_buffer.is_some()
    }

    pub fn buffer(&self) -> Option<&ReplayBuffer> {
        self.replay_buffer.as_ref()
    }

    /// Selects an action for `state`.
    ///
    /// With `explore`, zero-mean Gaussian noise of the current exploration
    /// magnitude is added and the magnitude decays. The result is always
    /// clipped into `[-1, 1]`.
    ///
    /// # Panics
    ///
    /// Panics if `state` has the wrong length or contains NaN/infinite values.
    pub fn act(&mut self, state: &[f64], explore: bool) -> Vec<f64> {
        assert_eq!(state.len(), self.state_dim, "state dimension mismatch");
        assert!(
            state.iter().all(|v| v.is_finite()),
            "state contains non-finite values"
        );
        let input = aview1(state).insert_axis(Axis(0));
        let mut action = self.actor_behaviour.predict(input).row(0).to_vec();

        if explore {
            for a in &mut action {
                *a += self.rng.sample::<f64, _>(StandardNormal) * self.exploration;
            }
            self.exploration *= self.config.exploration_decay;
        }

        for a in &mut action {
            *a = a.clamp(-1.0, 1.0);
        }
        action
    }

    /// Stores `transition`, samples a batch and performs one DDPG update.
    ///
    /// Returns the critic loss, or `None` when no update was made (warm-up or
    /// empty batch). Target networks are only blended after an update.
    pub fn train(&mut self, transition: Transition) -> Result<Option<f64>, AgentError> {
        self.train_inner(transition, None)
    }

    /// Like [`DdpgAgent::train`], but lets `correction` rewrite the sampled
    /// batch before the update.
    pub fn train_corrected(
        &mut self,
        transition: Transition,
        correction: &mut dyn BatchCorrection,
    ) -> Result<Option<f64>, AgentError> {
        self.train_inner(transition, Some(correction))
    }

    fn train_inner(
        &mut self,
        transition: Transition,
        correction: Option<&mut dyn BatchCorrection>,
    ) -> Result<Option<f64>, AgentError> {
        let buffer = self
            .replay_buffer
            .as_mut()
            .ok_or(AgentError::MissingReplayBuffer)?;
        buffer.add(transition);
        if buffer.len() < self.config.learning_starts {
            return Ok(None);
        }

        let mut batch = buffer.sample_batch(self.config.batch_size, &mut self.rng)?;
        if batch.is_empty() {
            return Ok(None);
        }
        if let Some(correction) = correction {
            correction.correct(&mut batch);
        }

        let loss = self.update(&batch)?;
        self.train_steps += 1;
        Ok(Some(loss))
    }

    fn update(&mut self, batch: &ReplayBatch) -> Result<f64, AgentError> {
        let n = batch.len() as f64;

        // TD targets from the slowly moving target networks.
        let target_actions = self.actor_target.predict(batch.next_states.view());
        let target_values = self
            .critic_target
            .predict(critic_input(batch.next_states.view(), target_actions.view())?.view());
        let bootstrap =
            target_values.column(0).to_owned() * batch.continuation_mask() * self.config.gamma;
        let y = (&batch.rewards + &bootstrap).insert_axis(Axis(1));

        let critic_inputs = critic_input(batch.states.view(), batch.actions.view())?;
        let loss = self.critic_behaviour.fit(critic_inputs.view(), y.view());

        // Deterministic policy gradient: climb the critic along dQ/da.
        let behaviour_actions = self.actor_behaviour.predict(batch.states.view());
        let ones = Array2::from_elem((batch.len(), 1), 1.0);
        let dq_dinput = self.critic_behaviour.input_gradient(
            critic_input(batch.states.view(), behaviour_actions.view())?.view(),
            ones.view(),
        );
        let actor_grad = dq_dinput
            .slice(s![.., self.state_dim..])
            .mapv(|g| -g / n);
        self.actor_behaviour
            .apply_output_gradient(batch.states.view(), actor_grad.view());

        soft_update(&self.actor_behaviour, &mut self.actor_target, self.config.tau)?;
        soft_update(&self.critic_behaviour, &mut self.critic_target, self.config.tau)?;
        Ok(loss)
    }

    pub fn exploration_magnitude(&self) -> f64 {
        self.exploration
    }

    /// Adjusts the exploration magnitude; it never drops below zero.
    pub fn modify_exploration(&mut self, adjust: ExplorationAdjust) {
        self.exploration = match adjust {
            ExplorationAdjust::Increment(delta) => self.exploration + delta,
            ExplorationAdjust::Assign(value) => value,
        }
        .max(0.0);
    }

    /// Number of updates performed so far.
    pub fn train_steps(&self) -> u64 {
        self.train_steps
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    pub fn config(&self) -> &DdpgConfig {
        &self.config
    }

    pub fn actor_behaviour(&self) -> &M {
        &self.actor_behaviour
    }

    pub fn actor_target(&self) -> &M {
        &self.actor_target
    }

    pub fn critic_behaviour(&self) -> &M {
        &self.critic_behaviour
    }

    pub fn critic_target(&self) -> &M {
        &self.critic_target
    }
}

impl<M: Model> ActionLikelihood for DdpgAgent<M> {
    /// Gaussian log-likelihood up to an additive constant:
    /// `-½ Σ ||a − μ(s)||²`.
    fn log_likelihood(&self, states: ArrayView2<f64>, actions: ArrayView2<f64>) -> f64 {
        let mean = self.actor_behaviour.predict(states);
        -0.5 * (&actions - &mean).mapv(|d| d * d).sum()
    }
}

fn artifact<M: Model>(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, M::FILE_EXTENSION))
}

/// `[state | action]` rows fed to the critic.
fn critic_input<'a>(states: ArrayView2<'a, f64>, actions: ArrayView2<'a, f64>) -> Result<Array2<f64>, AgentError> {
    Ok(concatenate(Axis(1), &[states, actions])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> DdpgConfig {
        DdpgConfig {
            hidden_units: vec![16, 8],
            batch_size: 8,
            buffer_capacity: 64,
            seed: 7,
            ..DdpgConfig::default()
        }
    }

    fn random_transition(rng: &mut StdRng, state_dim: usize, action_dim: usize) -> Transition {
        let mut v = |n: usize| (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect::<Vec<f64>>();
        Transition::new(v(state_dim), v(action_dim), v(state_dim), 1.0, false)
    }

    #[test]
    fn targets_start_as_copies() {
        let agent: DdpgAgent = DdpgAgent::new(3, 2, small_config()).unwrap();
        assert_eq!(
            agent.actor_target().parameters(),
            agent.actor_behaviour().parameters()
        );
        assert_eq!(
            agent.critic_target().parameters(),
            agent.critic_behaviour().parameters()
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = DdpgConfig {
            gamma: 1.5,
            ..small_config()
        };
        let result: Result<DdpgAgent, _> = DdpgAgent::new(3, 2, cfg);
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn exploring_actions_stay_in_bounds() {
        let cfg = DdpgConfig {
            exploration_magnitude: 5.0,
            ..small_config()
        };
        let mut agent: DdpgAgent = DdpgAgent::new(4, 3, cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let state: Vec<f64> = (0..4).map(|_| rng.gen_range(-10.0..10.0)).collect();
            let action = agent.act(&state, true);
            assert_eq!(action.len(), 3);
            assert!(action.iter().all(|a| (-1.0..=1.0).contains(a)));
        }
    }

    #[test]
    fn exploration_decays_strictly_and_stays_non_negative() {
        let mut agent: DdpgAgent = DdpgAgent::new(2, 1, small_config()).unwrap();
        let mut previous = agent.exploration_magnitude();
        for _ in 0..100 {
            agent.act(&[0.1, 0.2], true);
            let current = agent.exploration_magnitude();
            assert!(current < previous);
            assert!(current >= 0.0);
            previous = current;
        }
        // Greedy calls leave it untouched.
        agent.act(&[0.1, 0.2], false);
        assert_eq!(agent.exploration_magnitude(), previous);
    }

    #[test]
    fn greedy_action_is_deterministic() {
        let mut agent: DdpgAgent = DdpgAgent::new(2, 2, small_config()).unwrap();
        assert_eq!(agent.act(&[0.3, -0.3], false), agent.act(&[0.3, -0.3], false));
    }

    #[test]
    #[should_panic(expected = "non-finite")]
    fn act_rejects_nan_state() {
        let mut agent: DdpgAgent = DdpgAgent::new(2, 1, small_config()).unwrap();
        agent.act(&[f64::NAN, 0.0], false);
    }

    #[test]
    fn modify_exploration_clamps_at_zero() {
        let mut agent: DdpgAgent = DdpgAgent::new(2, 1, small_config()).unwrap();
        agent.modify_exploration(ExplorationAdjust::Increment(0.1));
        assert!((agent.exploration_magnitude() - 0.6).abs() < 1e-12);
        agent.modify_exploration(ExplorationAdjust::Increment(-5.0));
        assert_eq!(agent.exploration_magnitude(), 0.0);
        agent.modify_exploration(ExplorationAdjust::Assign(0.3));
        assert_eq!(agent.exploration_magnitude(), 0.3);
    }

    #[test]
    fn train_soft_updates_targets() {
        let mut agent: DdpgAgent = DdpgAgent::new(3, 2, small_config()).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let old_actor = agent.actor_behaviour().parameters();
        let old_critic = agent.critic_behaviour().parameters();

        let loss = agent.train(random_transition(&mut rng, 3, 2)).unwrap();
        assert!(loss.is_some());
        assert_eq!(agent.train_steps(), 1);

        let tau = agent.config().tau;
        for (old, new, target) in [
            (
                &old_actor,
                agent.actor_behaviour().parameters(),
                agent.actor_target().parameters(),
            ),
            (
                &old_critic,
                agent.critic_behaviour().parameters(),
                agent.critic_target().parameters(),
            ),
        ] {
            assert_ne!(&new, old, "behaviour network must have learned");
            for ((o, b), t) in old.iter().zip(&new).zip(&target) {
                let expected = tau * b + (1.0 - tau) * o;
                assert!((t - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn warm_up_reports_no_update_and_leaves_targets() {
        let cfg = DdpgConfig {
            learning_starts: 5,
            ..small_config()
        };
        let mut agent: DdpgAgent = DdpgAgent::new(3, 2, cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let target_before = agent.critic_target().parameters();
        for _ in 0..4 {
            assert_eq!(agent.train(random_transition(&mut rng, 3, 2)).unwrap(), None);
        }
        assert_eq!(agent.critic_target().parameters(), target_before);
        assert!(agent.train(random_transition(&mut rng, 3, 2)).unwrap().is_some());
    }

    #[test]
    fn critic_loss_trends_down_on_constant_reward() {
        let cfg = DdpgConfig {
            learning_rate_actor: 1e-3,
            learning_rate_critic: 1e-3,
            seed: 21,
            ..DdpgConfig::default()
        };
        let mut agent: DdpgAgent = DdpgAgent::new(4, 2, cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let mut losses = Vec::with_capacity(200);
        for _ in 0..200 {
            let t = random_transition(&mut rng, 4, 2);
            losses.push(agent.train(t).unwrap().unwrap());
        }
        let first: f64 = losses[..50].iter().sum::<f64>() / 50.0;
        let last: f64 = losses[150..].iter().sum::<f64>() / 50.0;
        assert!(last < first, "first 50 mean {first}, last 50 mean {last}");
    }

    #[test]
    fn log_likelihood_prefers_policy_actions() {
        let mut agent: DdpgAgent = DdpgAgent::new(2, 2, small_config()).unwrap();
        let state = [0.4, -0.1];
        let mean = agent.act(&state, false);
        let states = Array2::from_shape_vec((1, 2), state.to_vec()).unwrap();
        let good = Array2::from_shape_vec((1, 2), mean.clone()).unwrap();
        let bad = Array2::from_shape_vec((1, 2), vec![mean[0] + 0.5, mean[1] - 0.5]).unwrap();
        let good_score = agent.log_likelihood(states.view(), good.view());
        assert!(good_score.abs() < 1e-12);
        assert!(good_score > agent.log_likelihood(states.view(), bad.view()));
    }

    #[test]
    fn save_load_round_trip_produces_frozen_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent");
        let mut agent: DdpgAgent = DdpgAgent::new(3, 2, small_config()).unwrap();
        agent.save(&path).unwrap();
        assert!(path.join("actor_behaviour.json").exists());
        assert!(path.join("critic_target.json").exists());

        let mut restored: DdpgAgent = DdpgAgent::load(&path, small_config()).unwrap();
        assert!(!restored.is_trainable());
        assert_eq!(restored.state_dim(), 3);
        assert_eq!(restored.action_dim(), 2);
        assert_eq!(
            restored.act(&[0.1, 0.2, 0.3], false),
            agent.act(&[0.1, 0.2, 0.3], false)
        );

        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            restored.train(random_transition(&mut rng, 3, 2)),
            Err(AgentError::MissingReplayBuffer)
        ));

        restored.attach_buffer(ReplayBuffer::new(16));
        assert!(restored.train(random_transition(&mut rng, 3, 2)).is_ok());
    }

    #[test]
    fn load_from_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<DdpgAgent, _> = DdpgAgent::load(dir.path().join("absent"), small_config());
        assert!(matches!(result, Err(AgentError::ModelDirMissing(_))));
    }

    #[test]
    fn critic_input_joins_states_and_actions() {
        let states = Array2::from_elem((2, 2), 1.0);
        let actions = Array2::from_elem((2, 1), 2.0);
        let joined = critic_input(states.view(), actions.view()).unwrap();
        assert_eq!(joined.dim(), (2, 3));
        assert_eq!(joined[[1, 2]], 2.0);
        assert_eq!(joined[[0, 1]], 1.0);

        let short = Array2::from_elem((1, 1), 2.0);
        assert!(matches!(
            critic_input(states.view(), short.view()),
            Err(AgentError::Shape(_))
        ));
    }
}
