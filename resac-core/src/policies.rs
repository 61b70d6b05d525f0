use crate::rng::RngKey;
use anyhow::Result;
use candle_core::Tensor;

pub trait StochasticActor {
    /// Samples an action for every observation row, with its log-probability of shape `[batch]`.
    fn sample(&self, key: RngKey, obs: &Tensor) -> Result<(Tensor, Tensor)>;

    /// Deterministic action, used by evaluation.
    fn act(&self, obs: &Tensor) -> Result<Tensor>;
}

pub trait TwinCritic {
    /// Both Q estimates, each of shape `[batch]`.
    fn evaluate(&self, obs: &Tensor, action: &Tensor) -> Result<(Tensor, Tensor)>;
}

pub trait Temperature {
    fn value(&self) -> Result<f32>;
}
