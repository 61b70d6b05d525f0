pub mod adapters;
pub mod sequential_vec_env;
pub mod step;

use crate::rng::RngKey;
use anyhow::Result;
use candle_core::{DType, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    Continuous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        shape: Vec<usize>,
    },
}

impl Space {
    pub fn continuous_from_dims(dims: Vec<usize>) -> Self {
        Self::Continuous {
            min: None,
            max: None,
            shape: dims,
        }
    }

    pub fn bounded(min: Vec<f32>, max: Vec<f32>) -> Self {
        let shape = vec![min.len()];
        Self::Continuous {
            min: Some(min),
            max: Some(max),
            shape,
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Continuous { shape, .. } => shape.iter().product(),
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        match &self {
            Self::Discrete(_) => vec![],
            Self::Continuous { shape, .. } => shape.clone(),
        }
    }
}

/// Shapes and bounds of an environment, produced once when the environment is built.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvMeta {
    pub observation_space: Space,
    pub action_space: Space,
    pub dtype: DType,
}

impl EnvMeta {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
            dtype: DType::F32,
        }
    }

    pub fn observation_shape(&self) -> Vec<usize> {
        self.observation_space.shape()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }

    pub fn action_dim(&self) -> usize {
        self.action_space.size()
    }

    /// Action bounds, `[-1, 1]` per dimension when the space does not declare them.
    pub fn action_bounds(&self) -> Option<(Vec<f32>, Vec<f32>)> {
        match &self.action_space {
            Space::Discrete(_) => None,
            Space::Continuous { min, max, shape } => {
                let size = shape.iter().product();
                let min = min.clone().unwrap_or_else(|| vec![-1.; size]);
                let max = max.clone().unwrap_or_else(|| vec![1.; size]);
                Some((min, max))
            }
        }
    }
}

pub struct SnapShot {
    pub state: Tensor,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
}

/// A single stateful environment. `SequentialVecEnv` batches these into a `VecEnv`.
pub trait Env {
    fn reset(&mut self, seed: u64) -> Result<Tensor>;
    fn step(&mut self, action: &Tensor) -> Result<SnapShot>;
    fn env_meta(&self) -> EnvMeta;
}

#[derive(Debug, Clone, Default)]
pub struct StepInfo {
    /// Ended by a time limit rather than a terminal state.
    pub truncated: Vec<bool>,
}

/// One batched step. Every per-env vector has `num_envs` entries.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Observation each sub-environment continues from. Finished sub-environments are already
    /// reset here.
    pub next_obs: Tensor,
    /// Observation reached by the step itself, before any automatic reset.
    pub final_obs: Tensor,
    pub reward: Vec<f32>,
    pub done: Vec<bool>,
    pub info: StepInfo,
}

/// Traditional vectorized simulator. State lives inside the simulator and `step` mutates it.
pub trait VecEnv {
    fn num_envs(&self) -> usize;
    fn env_meta(&self) -> EnvMeta;
    fn reset(&mut self, seed: u64) -> Result<Tensor>;
    fn step(&mut self, actions: &Tensor) -> Result<StepOutput>;
}

/// Pure vectorized environment: the state is explicit and every call is a function of its
/// arguments only. Finished sub-environments are reset inside `step` with the given key.
pub trait FunctionalEnv {
    type State: Clone;

    fn num_envs(&self) -> usize;
    fn env_meta(&self) -> EnvMeta;
    fn reset(&self, key: RngKey) -> Result<(Tensor, Self::State)>;
    fn step(
        &self,
        key: RngKey,
        state: &Self::State,
        actions: &Tensor,
    ) -> Result<(StepOutput, Self::State)>;
}

/// The one call contract the training loop sees, whatever kind of environment is underneath.
pub trait EnvAdapter {
    fn num_envs(&self) -> usize;
    fn env_meta(&self) -> EnvMeta;
    fn reset(&mut self, key: RngKey) -> Result<Tensor>;
    fn step(&mut self, key: RngKey, actions: &Tensor) -> Result<StepOutput>;
}

impl<E: EnvAdapter + ?Sized> EnvAdapter for Box<E> {
    fn num_envs(&self) -> usize {
        (**self).num_envs()
    }

    fn env_meta(&self) -> EnvMeta {
        (**self).env_meta()
    }

    fn reset(&mut self, key: RngKey) -> Result<Tensor> {
        (**self).reset(key)
    }

    fn step(&mut self, key: RngKey, actions: &Tensor) -> Result<StepOutput> {
        (**self).step(key, actions)
    }
}
