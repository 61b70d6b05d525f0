use super::{EnvAdapter, EnvMeta, StepOutput};
use crate::error::SacError;
use crate::policies::StochasticActor;
use crate::rng::RngKey;
use anyhow::Result;
use candle_core::{Device, Tensor};

/// Draws a batch of `[num_envs, action_dim]` warm-up actions from a key.
pub type SeedSampler = Box<dyn Fn(RngKey) -> Result<Tensor>>;

/// Uniform sampler over the action-space bounds, `[-1, 1]` when the space declares none.
pub fn uniform_seed_sampler(
    meta: &EnvMeta,
    num_envs: usize,
    device: &Device,
) -> Result<SeedSampler> {
    let Some((low, high)) = meta.action_bounds() else {
        return Err(SacError::UnsupportedSpace(format!(
            "no uniform seed sampler for {:?}",
            meta.action_space
        ))
        .into());
    };
    let action_dim = low.len();
    let device = device.clone();
    Ok(Box::new(move |key: RngKey| {
        let samples = key.uniform(&low, &high, num_envs);
        Ok(Tensor::from_vec(samples, (num_envs, action_dim), &device)?)
    }))
}

pub fn select_action<A: StochasticActor>(
    key: RngKey,
    actor: &A,
    obs: &Tensor,
    seed_sampler: &SeedSampler,
    seed: bool,
) -> Result<Tensor> {
    if seed {
        seed_sampler(key)
    } else {
        let (action, _log_prob) = actor.sample(key, obs)?;
        Ok(action.detach())
    }
}

/// One transition: pick an action, then step the adapter with a sibling key.
pub fn env_step<E: EnvAdapter + ?Sized, A: StochasticActor>(
    key: RngKey,
    env: &mut E,
    obs: &Tensor,
    actor: &A,
    seed_sampler: &SeedSampler,
    seed: bool,
) -> Result<(Tensor, StepOutput)> {
    let (action_key, env_key) = key.split();
    let action = select_action(action_key, actor, obs, seed_sampler, seed)?;
    let output = env.step(env_key, &action)?;
    Ok((action, output))
}
