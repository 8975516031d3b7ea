//! Trains a flat or hierarchical DDPG agent on the point-mass task.
//!
//! Type `r q m l i d z` followed by Enter while training to toggle
//! rendering, save and quit, extend or shorten the run, or change the
//! exploration magnitude.
//!
//! ```text
//! RUST_LOG=info cargo run --example train_point_mass -- --hier --steps 200000
//! ```

use std::error::Error;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hierarchical_ddpg::training::{
    evaluate, CommandSource, Controller, Environment, JsonLinesSink, MetricsSink, NoCommands,
    PointMass, SessionConfig, StdinCommands, TracingSink, TrainingSession,
};
use hierarchical_ddpg::{DdpgAgent, DdpgConfig, HierarchyConfig, MetaAgent};

#[derive(Parser, Debug)]
#[command(name = "train_point_mass")]
struct Cli {
    /// Run name; models go to `<models-root>/<name>`.
    #[arg(long, default_value = "point_mass")]
    name: String,

    #[arg(long, default_value = "saved_models")]
    models_root: PathBuf,

    /// Environment step budget.
    #[arg(long)]
    steps: Option<u64>,

    /// Train the two-level agent instead of flat DDPG.
    #[arg(long)]
    hier: bool,

    #[arg(long)]
    render: bool,

    /// JSON file with `session`, `agent` and `hierarchy` sections.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dimension of the point-mass task.
    #[arg(long, default_value_t = 2)]
    dim: usize,

    /// Write one JSON line per episode here.
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Load saved models and run greedy episodes instead of training.
    #[arg(long)]
    test: Option<usize>,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoConfig {
    session: SessionConfig,
    agent: DdpgConfig,
    hierarchy: HierarchyConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<DemoConfig, Box<dyn Error>> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(DemoConfig::default()),
    }
}

fn build_sink(path: Option<&PathBuf>) -> Box<dyn MetricsSink> {
    let Some(path) = path else {
        return Box::new(TracingSink);
    };
    match File::create(path) {
        Ok(file) => Box::new(JsonLinesSink::new(BufWriter::new(file))),
        Err(err) => {
            warn!(path = %path.display(), %err, "cannot create metrics file, logging instead");
            Box::new(TracingSink)
        }
    }
}

fn build_commands() -> Box<dyn CommandSource> {
    match StdinCommands::spawn() {
        Ok(commands) => Box::new(commands),
        Err(err) => {
            warn!(%err, "stdin commands unavailable");
            Box::new(NoCommands)
        }
    }
}

fn train<C: Controller>(
    controller: &mut C,
    env: &mut PointMass,
    session: SessionConfig,
    cli: &Cli,
) -> Result<(), Box<dyn Error>> {
    let mut session = TrainingSession::new(session)?.with_render(cli.render);
    let mut commands = build_commands();
    let mut sink = build_sink(cli.metrics.as_ref());
    let summary = session.run(env, controller, commands.as_mut(), sink.as_mut())?;
    info!(
        episodes = summary.episodes,
        steps = summary.total_steps,
        steps_per_second = summary.steps_per_second(),
        "done"
    );
    Ok(())
}

fn test<C: Controller>(controller: &mut C, env: &mut PointMass, episodes: usize, max_steps: u64) {
    let scores = evaluate(env, controller, episodes, max_steps);
    for (episode, score) in scores.iter().enumerate() {
        info!(episode, score, "test episode");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(cli.config.as_ref())?;
    let mut session = config.session;
    session.models_dir = cli.models_root.join(&cli.name);
    if let Some(steps) = cli.steps {
        session.step_budget = steps;
    }

    let mut env = PointMass::new(cli.dim, cli.seed);
    let state_dim = env.observation_space().dim();
    let action_dim = env.action_space().dim();

    match (cli.hier, cli.test) {
        (true, None) => {
            let mut agent: MetaAgent = MetaAgent::new(state_dim, action_dim, config.hierarchy)?;
            train(&mut agent, &mut env, session, &cli)
        }
        (false, None) => {
            let mut agent: DdpgAgent = DdpgAgent::new(state_dim, action_dim, config.agent)?;
            train(&mut agent, &mut env, session, &cli)
        }
        (true, Some(episodes)) => {
            let mut agent: MetaAgent = MetaAgent::load(&session.models_dir, config.hierarchy)?;
            test(&mut agent, &mut env, episodes, session.max_steps_per_episode);
            Ok(())
        }
        (false, Some(episodes)) => {
            let mut agent: DdpgAgent = DdpgAgent::load(&session.models_dir, config.agent)?;
            test(&mut agent, &mut env, episodes, session.max_steps_per_episode);
            Ok(())
        }
    }
}
