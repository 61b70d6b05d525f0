use anyhow::Result;
use candle_core::Device;
use clap::{Parser, ValueEnum};
use resac_api::{
    builders::{
        env::EnvKind,
        sac::{RunConfig, SacBuilder},
    },
    logger::StatsLogger,
};
use resac_agents::sac::config::SacNetworkConfig;
use resac_core::{
    Algorithm, agents::OffPolicyAgent, config::SacConfig, evaluation::evaluate, rng::RngKey,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DeviceType {
    Cpu,
    Cuda,
}

#[derive(Parser, Debug)]
#[command(name = "resac", about = "Train a Soft Actor-Critic agent")]
struct Args {
    /// `pendulum` for the native functional env, anything else is a gymnasium id.
    #[arg(long, default_value = "pendulum")]
    env: String,

    /// JSON run config with a `sac` section and an optional `network` section.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long)]
    num_train_steps: Option<usize>,

    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Appends one JSON line per logged step.
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = DeviceType::Cpu)]
    device: DeviceType,
}

fn default_run() -> RunConfig {
    let mut sac = SacConfig::new(5_000, 1_000_000, 256, 100_000, 200);
    sac.num_envs = 4;
    RunConfig {
        sac,
        network: SacNetworkConfig::default(),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let device = match args.device {
        DeviceType::Cpu => Device::Cpu,
        DeviceType::Cuda => Device::new_cuda(0)?,
    };
    let mut run = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => default_run(),
    };
    if let Some(num_train_steps) = args.num_train_steps {
        run.sac.num_train_steps = num_train_steps;
    }
    let max_episode_length = run.sac.max_episode_length;
    let num_eval_envs = run.sac.num_eval_envs;
    let eval_steps = run.sac.eval_steps;

    let mut builder = SacBuilder::from_run_config(run).with_device(device.clone());
    if let Some(dir) = &args.checkpoint_dir {
        builder = builder.with_checkpoint_dir(dir);
    }
    let logger = match &args.metrics_file {
        Some(path) => StatsLogger::new().with_json_lines(path)?,
        None => StatsLogger::new(),
    };
    let kind = EnvKind::from_name(&args.env);
    info!(env = %args.env, seed = args.seed, "building SAC");
    let algo = builder.build_for(&kind, logger)?;

    let (train_key, eval_key) = RngKey::new(args.seed).split();
    let outcome = algo.train(train_key)?;
    info!(
        steps = outcome.counters.steps,
        episodes = outcome.counters.episodes,
        actor_updates = outcome.counters.actor_updates,
        target_updates = outcome.counters.target_updates,
        "done"
    );

    let mut eval_env = kind.build(num_eval_envs, max_episode_length, &device)?;
    let stats = evaluate(eval_key, &mut eval_env, outcome.agent.actor(), eval_steps)?;
    let mean_return = if stats.ep_rets.is_empty() {
        f32::NAN
    } else {
        stats.ep_rets.iter().sum::<f32>() / stats.ep_rets.len() as f32
    };
    info!(episodes = stats.episodes(), mean_return, "final evaluation");

    if let Some(dir) = &args.checkpoint_dir {
        let dir = dir.join("final");
        std::fs::create_dir_all(&dir)?;
        outcome.agent.save(&dir)?;
        info!(path = %dir.display(), "final checkpoint saved");
    }
    Ok(())
}
