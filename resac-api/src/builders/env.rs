use crate::envs::pendulum::Pendulum;
use anyhow::Result;
use candle_core::Device;
use resac_core::{
    env::{
        Env, EnvAdapter,
        adapters::{FunctionalAdapter, StatefulAdapter},
        sequential_vec_env::SequentialVecEnv,
    },
    error::SacError,
};
use resac_gym::GymEnv;

/// Builds one stateful environment instance.
pub trait EnvBuilderTrait {
    type Env: Env;

    fn build_env(&self, device: &Device) -> Result<Self::Env>;
}

impl EnvBuilderTrait for String {
    type Env = GymEnv;

    fn build_env(&self, device: &Device) -> Result<Self::Env> {
        GymEnv::new(self, None, device)
    }
}

impl<E: Env, F> EnvBuilderTrait for F
where
    F: Fn(&Device) -> Result<E>,
{
    type Env = E;

    fn build_env(&self, device: &Device) -> Result<Self::Env> {
        (self)(device)
    }
}

/// `num_envs` instances from `builder`, stepped one after the other behind the adapter.
pub fn build_sequential<B: EnvBuilderTrait>(
    builder: &B,
    num_envs: usize,
    device: &Device,
) -> Result<StatefulAdapter<SequentialVecEnv<B::Env>>> {
    let envs = (0..num_envs)
        .map(|_| builder.build_env(device))
        .collect::<Result<Vec<_>>>()?;
    Ok(StatefulAdapter::new(SequentialVecEnv::new(envs)?))
}

/// Environments the `resac` binary knows by name.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvKind {
    /// Native functional pendulum.
    Pendulum,
    /// Any gymnasium id, run through the embedded interpreter.
    Gym(String),
}

impl EnvKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "pendulum" => Self::Pendulum,
            other => Self::Gym(other.to_owned()),
        }
    }

    pub fn build(
        &self,
        num_envs: usize,
        max_episode_length: usize,
        device: &Device,
    ) -> Result<Box<dyn EnvAdapter>> {
        match self {
            Self::Pendulum => {
                let max_steps = u32::try_from(max_episode_length)
                    .map_err(|_| SacError::config("max_episode_length does not fit the pendulum"))?;
                let env = Pendulum::new(num_envs, max_steps, device)?;
                Ok(Box::new(FunctionalAdapter::new(env)))
            }
            Self::Gym(name) => {
                let builder = |device: &Device| {
                    GymEnv::new(name, Some(max_episode_length), device)
                        .map_err(|err| SacError::config(format!("cannot make `{name}`: {err}")))
                        .map_err(anyhow::Error::from)
                };
                Ok(Box::new(build_sequential(&builder, num_envs, device)?))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{EnvKind, build_sequential};
    use crate::envs::pendulum::PendulumEnv;
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use resac_core::{env::EnvAdapter, rng::RngKey};

    #[test]
    fn names_map_to_kinds() {
        assert_eq!(EnvKind::from_name("pendulum"), EnvKind::Pendulum);
        assert_eq!(
            EnvKind::from_name("Pendulum-v1"),
            EnvKind::Gym("Pendulum-v1".into())
        );
    }

    fn check_contract(env: &mut dyn EnvAdapter) -> Result<()> {
        let device = Device::Cpu;
        assert_eq!(env.num_envs(), 3);
        let obs = env.reset(RngKey::new(0))?;
        assert_eq!(obs.dims(), [3, 3]);
        let actions = Tensor::zeros((3, 1), DType::F32, &device)?;
        let output = env.step(RngKey::new(1), &actions)?;
        assert_eq!(output.next_obs.dims(), [3, 3]);
        assert_eq!(output.final_obs.dims(), [3, 3]);
        assert_eq!(output.reward.len(), 3);
        assert_eq!(output.done, vec![false; 3]);
        Ok(())
    }

    #[test]
    fn both_pendulums_expose_the_same_contract() -> Result<()> {
        let device = Device::Cpu;
        let mut functional = EnvKind::Pendulum.build(3, 10, &device)?;
        let builder = |device: &Device| Ok::<_, anyhow::Error>(PendulumEnv::new(10, device));
        let mut stateful = build_sequential(&builder, 3, &device)?;
        assert_eq!(functional.env_meta(), stateful.env_meta());
        check_contract(functional.as_mut())?;
        check_contract(&mut stateful)?;
        Ok(())
    }
}
