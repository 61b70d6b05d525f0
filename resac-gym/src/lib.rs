use anyhow::{Result, bail};
use candle_core::{Device, Tensor};
use pyo3::{
    PyObject, PyResult, Python,
    types::{PyAnyMethods, PyDict},
};
use resac_core::env::{Env, EnvMeta, SnapShot, Space};
use tracing::debug;

/// A gymnasium environment driven through the embedded Python interpreter. Steps mutate the
/// Python-side simulator, so this is a stateful `Env`.
pub struct GymEnv {
    env: PyObject,
    action_space: Space,
    observation_space: Space,
    device: Device,
}

impl GymEnv {
    pub fn new(name: &str, max_episode_steps: Option<usize>, device: &Device) -> Result<GymEnv> {
        let env = Python::with_gil(|py| {
            let gym = py.import("gymnasium")?;
            let kwargs = PyDict::new(py);
            if let Some(max_episode_steps) = max_episode_steps {
                kwargs.set_item("max_episode_steps", max_episode_steps)?;
            }
            let make = gym.getattr("make")?;
            let env = make.call((name,), Some(&kwargs))?;
            let action_space = env.getattr("action_space")?;
            let gym_spaces = py.import("gymnasium.spaces")?;
            let action_space = if action_space.is_instance(&gym_spaces.getattr("Discrete")?)? {
                Some(Space::Discrete(action_space.getattr("n")?.extract()?))
            } else if action_space.is_instance(&gym_spaces.getattr("Box")?)? {
                let low: Vec<f32> = action_space.getattr("low")?.extract()?;
                let high: Vec<f32> = action_space.getattr("high")?.extract()?;
                Some(Space::bounded(low, high))
            } else {
                None
            };
            let observation_shape: Vec<usize> =
                env.getattr("observation_space")?.getattr("shape")?.extract()?;
            PyResult::Ok((env.unbind(), action_space, observation_shape))
        })?;
        let (env, action_space, observation_shape) = env;
        let Some(action_space) = action_space else {
            bail!("gymnasium env `{name}` has an action space that is neither Discrete nor Box");
        };
        debug!(name, ?action_space, ?observation_shape, "gymnasium env created");
        Ok(GymEnv {
            env,
            action_space,
            observation_space: Space::continuous_from_dims(observation_shape),
            device: device.clone(),
        })
    }

    fn to_tensor(&self, state: Vec<f32>) -> Result<Tensor> {
        let len = state.len();
        Ok(Tensor::from_vec(state, len, &self.device)?)
    }
}

impl Env for GymEnv {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        let state: Vec<f32> = Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            kwargs.set_item("seed", seed)?;
            let state = self.env.call_method(py, "reset", (), Some(&kwargs))?;
            state.bind(py).get_item(0)?.extract()
        })?;
        self.to_tensor(state)
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action: Vec<f32> = action.flatten_all()?.to_vec1()?;
        let (state, reward, terminated, truncated) = Python::with_gil(|py| {
            let step = match &self.action_space {
                Space::Continuous {
                    min: Some(min),
                    max: Some(max),
                    ..
                } => {
                    let clipped: Vec<f32> = action
                        .iter()
                        .zip(min.iter().zip(max))
                        .map(|(a, (lo, hi))| a.clamp(*lo, *hi))
                        .collect();
                    self.env.call_method(py, "step", (clipped,), None)?
                }
                Space::Continuous { .. } => {
                    self.env.call_method(py, "step", (action.clone(),), None)?
                }
                Space::Discrete(_) => {
                    let index = action.first().map(|a| a.round().max(0.) as usize).unwrap_or(0);
                    self.env.call_method(py, "step", (index,), None)?
                }
            };
            let step = step.bind(py);
            let state: Vec<f32> = step.get_item(0)?.extract()?;
            let reward: f32 = step.get_item(1)?.extract()?;
            let terminated: bool = step.get_item(2)?.extract()?;
            let truncated: bool = step.get_item(3)?.extract()?;
            PyResult::Ok((state, reward, terminated, truncated))
        })?;
        Ok(SnapShot {
            state: self.to_tensor(state)?,
            reward,
            terminated,
            truncated,
        })
    }

    fn env_meta(&self) -> EnvMeta {
        EnvMeta::new(self.observation_space.clone(), self.action_space.clone())
    }
}
