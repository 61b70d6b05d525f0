use anyhow::Result;
use candle_core::Device;
use resac_api::{
    builders::{env::build_sequential, sac::SacBuilder},
    envs::pendulum::{Pendulum, PendulumEnv},
    logger::StatsLogger,
    test_utils::{Bandit, SharedLogger, small_config, tiny_network},
};
use resac_core::{
    Algorithm,
    agents::OffPolicyAgent,
    env::adapters::FunctionalAdapter,
    evaluation::evaluate,
    off_policy_algorithm::TrainCounters,
    rng::RngKey,
};

fn expected_counters() -> TrainCounters {
    // 60 steps, 2 envs, episodes of 25: flushed at steps 25 and 50
    TrainCounters {
        steps: 60,
        env_steps: 120,
        episodes: 4,
        critic_updates: 40,
        actor_updates: 40,
        target_updates: 40,
    }
}

#[test]
fn functional_pendulum_trains_end_to_end() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let builder = SacBuilder::new(small_config(2))
        .with_network(tiny_network())
        .with_checkpoint_dir(dir.path());
    let logger = SharedLogger::new(StatsLogger::new());
    let env = FunctionalAdapter::new(Pendulum::new(2, 25, &device)?);
    let eval_env = FunctionalAdapter::new(Pendulum::new(2, 25, &device)?);
    let algo = builder.build(env, Some(eval_env), logger.handle())?;

    let outcome = algo.train(RngKey::new(0))?;
    assert_eq!(outcome.counters, expected_counters());

    let logger = logger.0.borrow();
    assert_eq!(logger.last("test/ep_len_avg"), Some(25.));
    assert_eq!(logger.last("train/ep_len_max"), Some(25.));
    let update_steps: Vec<usize> = logger
        .history()
        .iter()
        .filter(|(_, stats)| stats.contains_key("train/critic_loss"))
        .map(|(step, _)| *step)
        .collect();
    assert_eq!(update_steps, vec![20, 30, 40, 50]);
    assert!(logger.last("train/ep_ret_avg").is_some_and(|ret| ret <= 0.));

    for step in ["step_30", "step_60"] {
        assert!(dir.path().join(step).join("actor.safetensors").exists());
    }
    Ok(())
}

#[test]
fn stateful_pendulum_trains_end_to_end() -> Result<()> {
    let device = Device::Cpu;
    let builder = SacBuilder::new(small_config(2)).with_network(tiny_network());
    let make = |device: &Device| Ok::<_, anyhow::Error>(PendulumEnv::new(25, device));
    let env = build_sequential(&make, 2, &device)?;
    let logger = SharedLogger::new(StatsLogger::new());
    let algo = builder.build(env, None, logger.handle())?;

    let outcome = algo.train(RngKey::new(1))?;
    assert_eq!(outcome.counters, expected_counters());
    let logger = logger.0.borrow();
    assert!(logger.last("test/ep_len_avg").is_none());
    assert!(logger.last("train/entropy").is_some());
    assert!(logger.last("train/temp_loss").is_some());
    assert_eq!(logger.last("train/target_entropy"), Some(-0.5));
    Ok(())
}

#[test]
fn one_step_episodes_are_all_counted() -> Result<()> {
    let mut config = small_config(2);
    config.eval_freq = 0;
    config.save_freq = 0;
    let builder = SacBuilder::new(config).with_network(tiny_network());
    let env = FunctionalAdapter::new(Bandit { num_envs: 2 });
    let logger = SharedLogger::new(StatsLogger::new());
    let algo = builder.build(env, None, logger.handle())?;

    let outcome = algo.train(RngKey::new(2))?;
    // the episodes of the final step are never flushed
    assert_eq!(outcome.counters.episodes, 118);
    assert_eq!(logger.0.borrow().last("train/ep_len_avg"), Some(1.));

    let mut eval_env = FunctionalAdapter::new(Bandit { num_envs: 3 });
    let stats = evaluate(RngKey::new(3), &mut eval_env, outcome.agent.actor(), 4)?;
    assert_eq!(stats.episodes(), 12);
    assert!(stats.ep_rets.iter().all(|ret| *ret <= 0. && *ret >= -2.25));
    Ok(())
}
