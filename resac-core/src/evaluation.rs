use crate::env::EnvAdapter;
use crate::policies::StochasticActor;
use crate::rng::RngKey;
use anyhow::Result;
use tracing::debug;

/// Returns and lengths of the episodes that finished during an evaluation rollout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalStats {
    pub ep_rets: Vec<f32>,
    pub ep_lens: Vec<f32>,
}

impl EvalStats {
    pub fn episodes(&self) -> usize {
        self.ep_rets.len()
    }
}

/// Resets `env` and runs `eval_steps` deterministic steps in every sub-environment. Episodes
/// are only counted at the timestep where they end, so unfinished ones are left out.
pub fn evaluate<E, A>(
    key: RngKey,
    env: &mut E,
    actor: &A,
    eval_steps: usize,
) -> Result<EvalStats>
where
    E: EnvAdapter + ?Sized,
    A: StochasticActor,
{
    let (reset_key, mut key) = key.split();
    let num_envs = env.num_envs();
    let mut obs = env.reset(reset_key)?;
    let mut ep_rets = vec![0f32; num_envs];
    let mut ep_lens = vec![0f32; num_envs];
    let mut stats = EvalStats::default();
    for _ in 0..eval_steps {
        let (next_key, step_key) = key.split();
        key = next_key;
        let action = actor.act(&obs)?.detach();
        let output = env.step(step_key, &action)?;
        for env_idx in 0..num_envs {
            ep_rets[env_idx] += output.reward[env_idx];
            ep_lens[env_idx] += 1.;
            if output.done[env_idx] {
                stats.ep_rets.push(ep_rets[env_idx]);
                stats.ep_lens.push(ep_lens[env_idx]);
                ep_rets[env_idx] = 0.;
                ep_lens[env_idx] = 0.;
            }
        }
        obs = output.next_obs;
    }
    debug!(episodes = stats.episodes(), "evaluation rollout finished");
    Ok(stats)
}

#[cfg(test)]
mod test {
    use super::{EvalStats, evaluate};
    use crate::env::adapters::FunctionalAdapter;
    use crate::env::{EnvMeta, FunctionalEnv, Space, StepInfo, StepOutput};
    use crate::policies::StochasticActor;
    use crate::rng::RngKey;
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};

    /// Episodes of `horizon` steps, rewarded with the step index reached.
    struct Countdown {
        num_envs: usize,
        horizon: u32,
    }

    impl FunctionalEnv for Countdown {
        type State = Vec<u32>;

        fn num_envs(&self) -> usize {
            self.num_envs
        }

        fn env_meta(&self) -> EnvMeta {
            EnvMeta::new(
                Space::continuous_from_dims(vec![1]),
                Space::bounded(vec![-1.], vec![1.]),
            )
        }

        fn reset(&self, _key: RngKey) -> Result<(Tensor, Self::State)> {
            let obs = Tensor::zeros((self.num_envs, 1), DType::F32, &Device::Cpu)?;
            Ok((obs, vec![0; self.num_envs]))
        }

        fn step(
            &self,
            _key: RngKey,
            state: &Self::State,
            _actions: &Tensor,
        ) -> Result<(StepOutput, Self::State)> {
            let reached: Vec<u32> = state.iter().map(|t| t + 1).collect();
            let done: Vec<bool> = reached.iter().map(|t| *t >= self.horizon).collect();
            let next: Vec<u32> = reached
                .iter()
                .zip(&done)
                .map(|(t, done)| if *done { 0 } else { *t })
                .collect();
            let obs = Tensor::zeros((self.num_envs, 1), DType::F32, &Device::Cpu)?;
            let output = StepOutput {
                next_obs: obs.clone(),
                final_obs: obs,
                reward: reached.iter().map(|t| *t as f32).collect(),
                info: StepInfo {
                    truncated: done.clone(),
                },
                done,
            };
            Ok((output, next))
        }
    }

    struct Still;

    impl StochasticActor for Still {
        fn sample(&self, _key: RngKey, obs: &Tensor) -> Result<(Tensor, Tensor)> {
            let batch = obs.dim(0)?;
            Ok((
                Tensor::zeros((batch, 1), DType::F32, obs.device())?,
                Tensor::zeros(batch, DType::F32, obs.device())?,
            ))
        }

        fn act(&self, obs: &Tensor) -> Result<Tensor> {
            Ok(Tensor::zeros((obs.dim(0)?, 1), DType::F32, obs.device())?)
        }
    }

    #[test]
    fn unfinished_episodes_are_left_out() -> Result<()> {
        let mut env = FunctionalAdapter::new(Countdown {
            num_envs: 2,
            horizon: 4,
        });
        let stats = evaluate(RngKey::new(0), &mut env, &Still, 6)?;
        assert_eq!(stats.episodes(), 2);
        assert_eq!(stats.ep_lens, vec![4., 4.]);
        // 1 + 2 + 3 + 4, the two steps of the second episodes are dropped
        assert_eq!(stats.ep_rets, vec![10., 10.]);

        let short = evaluate(RngKey::new(1), &mut env, &Still, 3)?;
        assert_eq!(short, EvalStats::default());
        Ok(())
    }
}
