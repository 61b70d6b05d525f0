use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use resac_agents::sac::config::SacNetworkConfig;
use resac_core::{
    config::SacConfig,
    env::{EnvMeta, FunctionalEnv, Space, StepInfo, StepOutput},
    logger::{Logger, Metric, Stats},
    rng::RngKey,
};
use std::{cell::RefCell, rc::Rc};

/// Networks small enough for a few hundred CPU updates in a test.
pub fn tiny_network() -> SacNetworkConfig {
    SacNetworkConfig {
        actor_hidden: vec![16],
        critic_hidden: vec![16],
        actor_lr: 1e-3,
        critic_lr: 1e-3,
        temp_lr: 1e-3,
        ..Default::default()
    }
}

/// Short pendulum run: 20 seed steps, 60 steps total, episodes of 25 steps.
pub fn small_config(num_envs: usize) -> SacConfig {
    let mut config = SacConfig::new(20, 400, 16, 60, 25);
    config.num_envs = num_envs;
    config.num_eval_envs = 2;
    config.eval_freq = 30;
    config.eval_steps = 25;
    config.log_freq = 10;
    config.save_freq = 30;
    config
}

/// One-step episodes: every action ends the episode with reward `-(a - 0.5)^2`.
pub struct Bandit {
    pub num_envs: usize,
}

impl Bandit {
    fn obs(&self) -> Result<Tensor> {
        Ok(Tensor::ones((self.num_envs, 1), DType::F32, &Device::Cpu)?)
    }
}

impl FunctionalEnv for Bandit {
    type State = ();

    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn env_meta(&self) -> EnvMeta {
        EnvMeta::new(
            Space::continuous_from_dims(vec![1]),
            Space::bounded(vec![-1.], vec![1.]),
        )
    }

    fn reset(&self, _key: RngKey) -> Result<(Tensor, ())> {
        Ok((self.obs()?, ()))
    }

    fn step(&self, _key: RngKey, _state: &(), actions: &Tensor) -> Result<(StepOutput, ())> {
        let actions: Vec<f32> = actions.flatten_all()?.to_vec1()?;
        let output = StepOutput {
            next_obs: self.obs()?,
            final_obs: self.obs()?,
            reward: actions.iter().map(|a| -(a - 0.5).powi(2)).collect(),
            done: vec![true; self.num_envs],
            info: StepInfo {
                truncated: vec![false; self.num_envs],
            },
        };
        Ok((output, ()))
    }
}

/// Logger handle that stays readable after the training loop consumed its copy.
pub struct SharedLogger<L>(pub Rc<RefCell<L>>);

impl<L> SharedLogger<L> {
    pub fn new(logger: L) -> Self {
        Self(Rc::new(RefCell::new(logger)))
    }

    pub fn handle(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<L: Logger> Logger for SharedLogger<L> {
    fn store(&mut self, tag: &str, metrics: Vec<(&str, Metric)>, append: bool) {
        self.0.borrow_mut().store(tag, metrics, append);
    }

    fn log(&mut self, step: usize) -> Result<Stats> {
        self.0.borrow_mut().log(step)
    }

    fn reset(&mut self) {
        self.0.borrow_mut().reset();
    }
}
