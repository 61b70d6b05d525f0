use super::{EnvAdapter, EnvMeta, FunctionalEnv, StepOutput, VecEnv};
use crate::rng::RngKey;
use anyhow::{Result, bail};
use candle_core::Tensor;

/// Threads the explicit state of a `FunctionalEnv` from one call to the next.
pub struct FunctionalAdapter<F: FunctionalEnv> {
    env: F,
    state: Option<F::State>,
}

impl<F: FunctionalEnv> FunctionalAdapter<F> {
    pub fn new(env: F) -> Self {
        Self { env, state: None }
    }
}

impl<F: FunctionalEnv> EnvAdapter for FunctionalAdapter<F> {
    fn num_envs(&self) -> usize {
        self.env.num_envs()
    }

    fn env_meta(&self) -> EnvMeta {
        self.env.env_meta()
    }

    fn reset(&mut self, key: RngKey) -> Result<Tensor> {
        let (obs, state) = self.env.reset(key)?;
        self.state = Some(state);
        Ok(obs)
    }

    fn step(&mut self, key: RngKey, actions: &Tensor) -> Result<StepOutput> {
        let Some(state) = self.state.as_ref() else {
            bail!("functional environment stepped before reset");
        };
        let (output, next_state) = self.env.step(key, state, actions)?;
        self.state = Some(next_state);
        Ok(output)
    }
}

/// Wraps a stateful `VecEnv`. Its state is implicit, so the step key is unused and the reset
/// key becomes a plain seed.
pub struct StatefulAdapter<V: VecEnv> {
    env: V,
}

impl<V: VecEnv> StatefulAdapter<V> {
    pub fn new(env: V) -> Self {
        Self { env }
    }
}

impl<V: VecEnv> EnvAdapter for StatefulAdapter<V> {
    fn num_envs(&self) -> usize {
        self.env.num_envs()
    }

    fn env_meta(&self) -> EnvMeta {
        self.env.env_meta()
    }

    fn reset(&mut self, key: RngKey) -> Result<Tensor> {
        self.env.reset(key.into_seed())
    }

    fn step(&mut self, _key: RngKey, actions: &Tensor) -> Result<StepOutput> {
        self.env.step(actions)
    }
}
