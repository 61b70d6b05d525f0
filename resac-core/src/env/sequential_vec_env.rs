use super::{Env, EnvMeta, SnapShot, StepInfo, StepOutput, VecEnv};
use crate::error::SacError;
use anyhow::{Result, ensure};
use candle_core::Tensor;
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Steps a list of single environments one after the other and resets the finished ones. The
/// reset seeds come from a generator seeded by `reset`, so the whole thing stays reproducible.
pub struct SequentialVecEnv<E: Env> {
    pub envs: Vec<E>,
    env_meta: EnvMeta,
    reset_rng: StdRng,
    states: Vec<Tensor>,
}

impl<E: Env> SequentialVecEnv<E> {
    pub fn new(envs: Vec<E>) -> Result<Self> {
        ensure!(
            !envs.is_empty(),
            SacError::config("a vec env needs at least one environment")
        );
        let env_meta = envs[0].env_meta();
        Ok(Self {
            envs,
            env_meta,
            reset_rng: StdRng::seed_from_u64(0),
            states: vec![],
        })
    }
}

impl<E: Env> VecEnv for SequentialVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn env_meta(&self) -> EnvMeta {
        self.env_meta.clone()
    }

    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.reset_rng = StdRng::seed_from_u64(seed);
        let mut states = Vec::with_capacity(self.envs.len());
        for env in self.envs.iter_mut() {
            states.push(env.reset(self.reset_rng.random())?);
        }
        self.states = states;
        Ok(Tensor::stack(&self.states, 0)?)
    }

    fn step(&mut self, actions: &Tensor) -> Result<StepOutput> {
        let num_envs = self.envs.len();
        ensure!(
            self.states.len() == num_envs,
            "sequential vec env stepped before reset"
        );
        ensure!(
            actions.dim(0)? == num_envs,
            SacError::ShapeMismatch {
                field: "action".into(),
                expected: vec![num_envs],
                actual: actions.dims().to_vec(),
            }
        );
        let mut final_states = Vec::with_capacity(num_envs);
        let mut rewards = Vec::with_capacity(num_envs);
        let mut dones = Vec::with_capacity(num_envs);
        let mut truncations = Vec::with_capacity(num_envs);
        for (env_idx, env) in self.envs.iter_mut().enumerate() {
            let action = actions.get(env_idx)?;
            let SnapShot {
                state,
                reward,
                terminated,
                truncated,
            } = env.step(&action)?;
            let done = terminated || truncated;
            final_states.push(state.clone());
            self.states[env_idx] = if done {
                env.reset(self.reset_rng.random())?
            } else {
                state
            };
            rewards.push(reward);
            dones.push(done);
            truncations.push(truncated && !terminated);
        }
        Ok(StepOutput {
            next_obs: Tensor::stack(&self.states, 0)?,
            final_obs: Tensor::stack(&final_states, 0)?,
            reward: rewards,
            done: dones,
            info: StepInfo {
                truncated: truncations,
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::SequentialVecEnv;
    use crate::env::{Env, EnvMeta, SnapShot, Space, VecEnv};
    use anyhow::Result;
    use candle_core::{Device, Tensor};

    struct Counter {
        t: u32,
        horizon: u32,
    }

    impl Env for Counter {
        fn reset(&mut self, _seed: u64) -> Result<Tensor> {
            self.t = 0;
            Ok(Tensor::new(&[0f32], &Device::Cpu)?)
        }

        fn step(&mut self, _action: &Tensor) -> Result<SnapShot> {
            self.t += 1;
            Ok(SnapShot {
                state: Tensor::new(&[self.t as f32], &Device::Cpu)?,
                reward: 1.,
                terminated: false,
                truncated: self.t == self.horizon,
            })
        }

        fn env_meta(&self) -> EnvMeta {
            EnvMeta::new(
                Space::continuous_from_dims(vec![1]),
                Space::bounded(vec![-1.], vec![1.]),
            )
        }
    }

    #[test]
    fn finished_envs_are_reset() -> Result<()> {
        let envs = vec![Counter { t: 0, horizon: 2 }, Counter { t: 0, horizon: 3 }];
        let mut vec_env = SequentialVecEnv::new(envs)?;
        let obs = vec_env.reset(0)?;
        assert_eq!(obs.dims(), &[2, 1]);
        let actions = Tensor::zeros((2, 1), candle_core::DType::F32, &Device::Cpu)?;
        vec_env.step(&actions)?;
        let out = vec_env.step(&actions)?;
        assert_eq!(out.done, vec![true, false]);
        assert_eq!(out.info.truncated, vec![true, false]);
        assert_eq!(out.final_obs.flatten_all()?.to_vec1::<f32>()?, vec![2., 2.]);
        assert_eq!(out.next_obs.flatten_all()?.to_vec1::<f32>()?, vec![0., 2.]);
        Ok(())
    }

    #[test]
    fn step_before_reset_fails() -> Result<()> {
        let mut vec_env = SequentialVecEnv::new(vec![Counter { t: 0, horizon: 2 }])?;
        let actions = Tensor::zeros((1, 1), candle_core::DType::F32, &Device::Cpu)?;
        assert!(vec_env.step(&actions).is_err());
        Ok(())
    }
}
