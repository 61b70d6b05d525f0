use crate::{
    Algorithm,
    agents::{OffPolicyAgent, UpdateAux, UpdateFlags},
    buffers::{ACTION, ENV_OBS, MASK, NEXT_ENV_OBS, REWARD, replay_buffer::ReplayBuffer},
    config::SacConfig,
    env::{
        EnvAdapter, StepOutput,
        step::{SeedSampler, env_step, uniform_seed_sampler},
    },
    error::SacError,
    evaluation::evaluate,
    logger::Logger,
    rng::RngKey,
};
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use std::path::PathBuf;
use tracing::{debug, info, info_span};

/// Bootstrap indicator of a stored transition. Only a `done` reached before the episode-length
/// limit is a true terminal; hitting the limit itself still bootstraps.
pub fn bootstrap_mask(done: bool, episode_length: usize, max_episode_length: usize) -> f32 {
    if !done || episode_length == max_episode_length {
        1.
    } else {
        0.
    }
}

/// Every cadence of the loop as a pure function of the step counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainSchedule {
    pub num_seed_steps: usize,
    pub actor_update_freq: usize,
    pub target_update_freq: usize,
    pub eval_freq: usize,
    pub log_freq: usize,
    pub save_freq: usize,
}

impl TrainSchedule {
    pub fn from_config(config: &SacConfig) -> Self {
        Self {
            num_seed_steps: config.num_seed_steps,
            actor_update_freq: config.actor_update_freq,
            target_update_freq: config.target_update_freq,
            eval_freq: config.eval_freq,
            log_freq: config.log_freq,
            save_freq: config.save_freq,
        }
    }

    pub fn is_seed_step(&self, step: usize) -> bool {
        step < self.num_seed_steps
    }

    pub fn should_update(&self, step: usize) -> bool {
        !self.is_seed_step(step)
    }

    pub fn update_flags(&self, step: usize) -> UpdateFlags {
        UpdateFlags {
            update_actor: step % self.actor_update_freq == 0,
            update_target: step % self.target_update_freq == 0,
        }
    }

    pub fn should_evaluate(&self, step: usize) -> bool {
        self.eval_freq > 0 && step > 0 && step % self.eval_freq == 0 && step >= self.num_seed_steps
    }

    pub fn should_log(&self, step: usize) -> bool {
        self.log_freq > 0 && step % self.log_freq == 0
    }

    /// Checked after the step ran, so the checkpoint covers `step + 1` completed steps.
    pub fn should_save(&self, step: usize) -> bool {
        self.save_freq > 0 && (step + 1) % self.save_freq == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrainCounters {
    pub steps: usize,
    pub env_steps: usize,
    pub episodes: usize,
    pub critic_updates: usize,
    pub actor_updates: usize,
    pub target_updates: usize,
}

pub struct TrainOutcome<A> {
    pub agent: A,
    pub counters: TrainCounters,
}

/// Running per-env episode accumulators and the counters of the run.
#[derive(Debug, Clone)]
pub struct TrainState {
    pub ep_lens: Vec<usize>,
    pub ep_rets: Vec<f32>,
    pub dones: Vec<bool>,
    pub counters: TrainCounters,
}

impl TrainState {
    pub fn new(num_envs: usize) -> Self {
        Self {
            ep_lens: vec![0; num_envs],
            ep_rets: vec![0.; num_envs],
            dones: vec![false; num_envs],
            counters: TrainCounters::default(),
        }
    }

    /// Logs the episodes that ended on the previous env step under `train` and clears their
    /// accumulators. Does nothing when no episode ended.
    pub fn flush_finished_episodes<L: Logger>(
        &mut self,
        logger: &mut L,
        step: usize,
    ) -> Result<()> {
        if !self.dones.iter().any(|done| *done) {
            return Ok(());
        }
        let mut ep_rets = vec![];
        let mut ep_lens = vec![];
        for env_idx in 0..self.dones.len() {
            if self.dones[env_idx] {
                ep_rets.push(self.ep_rets[env_idx]);
                ep_lens.push(self.ep_lens[env_idx] as f32);
                self.ep_rets[env_idx] = 0.;
                self.ep_lens[env_idx] = 0;
                self.dones[env_idx] = false;
            }
        }
        self.counters.episodes += ep_rets.len();
        logger.store(
            "train",
            vec![("ep_ret", ep_rets.into()), ("ep_len", ep_lens.into())],
            false,
        );
        logger.log(step)?;
        logger.reset();
        Ok(())
    }

    /// Accumulates one env step and returns the bootstrap mask of every env.
    pub fn record_step(
        &mut self,
        output: &StepOutput,
        max_episode_length: usize,
    ) -> Result<Vec<f32>> {
        let num_envs = self.dones.len();
        ensure!(
            output.reward.len() == num_envs && output.done.len() == num_envs,
            SacError::ShapeMismatch {
                field: "reward/done".into(),
                expected: vec![num_envs],
                actual: vec![output.reward.len(), output.done.len()],
            }
        );
        self.counters.env_steps += num_envs;
        let masks = (0..num_envs)
            .map(|env_idx| {
                self.ep_lens[env_idx] += 1;
                self.ep_rets[env_idx] += output.reward[env_idx];
                self.dones[env_idx] = output.done[env_idx];
                bootstrap_mask(
                    output.done[env_idx],
                    self.ep_lens[env_idx],
                    max_episode_length,
                )
            })
            .collect();
        Ok(masks)
    }

    pub fn record_update(&mut self, aux: &UpdateAux) {
        self.counters.critic_updates += 1;
        if aux.actor.is_some() {
            self.counters.actor_updates += 1;
        }
        if aux.target_updated {
            self.counters.target_updates += 1;
        }
    }
}

fn log_update<L: Logger>(
    logger: &mut L,
    step: usize,
    aux: &UpdateAux,
    target_entropy: f32,
    learnable_temp: bool,
) -> Result<()> {
    logger.store(
        "train",
        vec![
            ("critic_loss", aux.critic.critic_loss.into()),
            ("q1", aux.critic.q1.into()),
            ("q2", aux.critic.q2.into()),
            ("temp", aux.temp.temp.into()),
        ],
        false,
    );
    if let Some(actor) = aux.actor {
        logger.store(
            "train",
            vec![
                ("actor_loss", actor.actor_loss.into()),
                ("entropy", actor.entropy.into()),
                ("target_entropy", target_entropy.into()),
            ],
            false,
        );
        if let (true, Some(temp_loss)) = (learnable_temp, aux.temp.temp_loss) {
            logger.store("train", vec![("temp_loss", temp_loss.into())], false);
        }
    }
    let stats = logger.log(step)?;
    logger.reset();
    debug!(step, metrics = stats.len(), "logged update metrics");
    Ok(())
}

/// Off-policy training loop: collect into the replay buffer, then update the agent from
/// uniformly sampled batches.
pub struct OffPolicyAlgorithm<A: OffPolicyAgent, E: EnvAdapter, L: Logger> {
    pub agent: A,
    pub env: E,
    pub eval_env: Option<E>,
    pub replay_buffer: ReplayBuffer,
    pub seed_sampler: SeedSampler,
    pub logger: L,
    pub config: SacConfig,
    pub schedule: TrainSchedule,
    pub checkpoint_dir: Option<PathBuf>,
}

impl<A: OffPolicyAgent, E: EnvAdapter, L: Logger> OffPolicyAlgorithm<A, E, L> {
    pub fn new(
        agent: A,
        env: E,
        eval_env: Option<E>,
        logger: L,
        mut config: SacConfig,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let meta = env.env_meta();
        config.resolve_target_entropy(meta.action_dim());
        if env.num_envs() != config.num_envs {
            return Err(SacError::config(format!(
                "environment runs {} envs but num_envs is {}",
                env.num_envs(),
                config.num_envs
            ))
            .into());
        }
        if let Some(eval_env) = &eval_env {
            if eval_env.num_envs() != config.num_eval_envs {
                return Err(SacError::config(format!(
                    "evaluation environment runs {} envs but num_eval_envs is {}",
                    eval_env.num_envs(),
                    config.num_eval_envs
                ))
                .into());
            }
        }
        let replay_buffer = ReplayBuffer::for_transitions(
            config.replay_buffer_capacity,
            config.num_envs,
            &meta,
            device,
        )?;
        let seed_sampler = uniform_seed_sampler(&meta, config.num_envs, device)?;
        let schedule = TrainSchedule::from_config(&config);
        Ok(Self {
            agent,
            env,
            eval_env,
            replay_buffer,
            seed_sampler,
            logger,
            config,
            schedule,
            checkpoint_dir: None,
        })
    }

    pub fn with_seed_sampler(mut self, seed_sampler: SeedSampler) -> Self {
        self.seed_sampler = seed_sampler;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }
}

impl<A: OffPolicyAgent, E: EnvAdapter, L: Logger> Algorithm for OffPolicyAlgorithm<A, E, L> {
    type Outcome = TrainOutcome<A>;

    fn train(self, key: RngKey) -> Result<Self::Outcome> {
        let Self {
            mut agent,
            mut env,
            mut eval_env,
            mut replay_buffer,
            seed_sampler,
            mut logger,
            config,
            schedule,
            checkpoint_dir,
        } = self;
        let span = info_span!("train", num_train_steps = config.num_train_steps);
        let _enter = span.enter();
        let target_entropy = config.target_entropy.unwrap_or_default();
        let num_envs = config.num_envs;

        let (reset_key, mut key) = key.split();
        let mut obs = env.reset(reset_key)?;
        let mut state = TrainState::new(num_envs);
        info!(num_envs, "training started");

        for step in 0..config.num_train_steps {
            if schedule.should_evaluate(step) {
                if let Some(eval_env) = eval_env.as_mut() {
                    let (next_key, eval_key) = key.split();
                    key = next_key;
                    let _eval = info_span!("eval", step).entered();
                    let stats = evaluate(eval_key, eval_env, agent.actor(), config.eval_steps)?;
                    info!(episodes = stats.episodes(), "evaluated");
                    logger.store(
                        "test",
                        vec![
                            ("ep_ret", stats.ep_rets.into()),
                            ("ep_len", stats.ep_lens.into()),
                        ],
                        false,
                    );
                    logger.log(step)?;
                    logger.reset();
                }
            }

            let seed = schedule.is_seed_step(step);
            for _ in 0..config.steps_per_env {
                state.flush_finished_episodes(&mut logger, step)?;
                let (next_key, env_key) = key.split();
                key = next_key;
                let (action, output) =
                    env_step(env_key, &mut env, &obs, agent.actor(), &seed_sampler, seed)?;
                let masks = state.record_step(&output, config.max_episode_length)?;

                let device = obs.device().clone();
                let reward = Tensor::from_vec(output.reward.clone(), num_envs, &device)?;
                let mask = Tensor::from_vec(masks, num_envs, &device)?;
                replay_buffer.store(&[
                    (ENV_OBS, &obs),
                    (ACTION, &action),
                    (REWARD, &reward),
                    (MASK, &mask),
                    (NEXT_ENV_OBS, &output.final_obs),
                ])?;
                obs = output.next_obs;
            }

            if schedule.should_update(step) {
                let flags = schedule.update_flags(step);
                let mut last_aux = None;
                for _ in 0..config.grad_updates_per_step {
                    let [next_key, sample_key, update_key] = key.split_n();
                    key = next_key;
                    let batch = replay_buffer.sample_transitions(sample_key, config.batch_size)?;
                    let (next_agent, aux) = agent.update(update_key, &batch, flags)?;
                    agent = next_agent;
                    state.record_update(&aux);
                    last_aux = Some(aux);
                }
                if let (true, Some(aux)) = (schedule.should_log(step), last_aux) {
                    log_update(&mut logger, step, &aux, target_entropy, config.learnable_temp)?;
                }
            }

            state.counters.steps += 1;
            if schedule.should_save(step) {
                if let Some(dir) = &checkpoint_dir {
                    let dir = dir.join(format!("step_{}", step + 1));
                    std::fs::create_dir_all(&dir)?;
                    agent.save(&dir)?;
                    info!(path = %dir.display(), "checkpoint saved");
                }
            }
        }

        let counters = state.counters;
        info!(
            steps = counters.steps,
            episodes = counters.episodes,
            critic_updates = counters.critic_updates,
            "training finished"
        );
        Ok(TrainOutcome { agent, counters })
    }
}

#[cfg(test)]
mod test {
    use super::{TrainSchedule, bootstrap_mask};
    use crate::config::SacConfig;

    #[test]
    fn mask_only_drops_true_terminals() {
        assert_eq!(bootstrap_mask(true, 10, 200), 0.);
        assert_eq!(bootstrap_mask(true, 200, 200), 1.);
        assert_eq!(bootstrap_mask(false, 10, 200), 1.);
        assert_eq!(bootstrap_mask(false, 200, 200), 1.);
    }

    #[test]
    fn schedule_counts() {
        let mut config = SacConfig::new(20, 100, 10, 30, 200);
        config.actor_update_freq = 2;
        config.target_update_freq = 3;
        let schedule = TrainSchedule::from_config(&config);
        let update_steps: Vec<usize> = (0..30).filter(|s| schedule.should_update(*s)).collect();
        assert_eq!(update_steps, (20..30).collect::<Vec<_>>());
        let actor = update_steps
            .iter()
            .filter(|s| schedule.update_flags(**s).update_actor)
            .count();
        let target = update_steps
            .iter()
            .filter(|s| schedule.update_flags(**s).update_target)
            .count();
        assert_eq!(actor, 5);
        assert_eq!(target, 3);
    }

    #[test]
    fn eval_waits_for_warm_up() {
        let mut config = SacConfig::new(20, 100, 10, 100, 200);
        config.eval_freq = 10;
        let schedule = TrainSchedule::from_config(&config);
        let evals: Vec<usize> = (0..50).filter(|s| schedule.should_evaluate(*s)).collect();
        assert_eq!(evals, vec![20, 30, 40]);

        config.eval_freq = 0;
        let schedule = TrainSchedule::from_config(&config);
        assert!(!(0..50).any(|s| schedule.should_evaluate(s)));
    }

    #[test]
    fn save_counts_completed_steps() {
        let mut config = SacConfig::new(0, 100, 10, 100, 200);
        config.save_freq = 25;
        let schedule = TrainSchedule::from_config(&config);
        let saves: Vec<usize> = (0..100).filter(|s| schedule.should_save(*s)).collect();
        assert_eq!(saves, vec![24, 49, 74, 99]);
    }
}
