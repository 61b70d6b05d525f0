use crate::error::SacError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hyperparameters of one SAC run. Only the first five fields are required when loading from
/// JSON; the rest fall back to the usual SAC defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SacConfig {
    /// Warm-up steps driven by the seed sampler, without gradient updates.
    pub num_seed_steps: usize,
    /// Total interactions kept, split as `ceil(capacity / num_envs)` rows per env.
    pub replay_buffer_capacity: usize,
    pub batch_size: usize,
    pub num_train_steps: usize,
    /// Episode length at which a `done` is a time-limit truncation and still bootstraps.
    pub max_episode_length: usize,

    #[serde(default = "one")]
    pub num_envs: usize,
    #[serde(default = "one")]
    pub steps_per_env: usize,
    #[serde(default = "one")]
    pub grad_updates_per_step: usize,

    #[serde(default = "default_tau")]
    pub tau: f32,
    #[serde(default = "default_discount")]
    pub discount: f32,
    #[serde(default = "yes")]
    pub backup_entropy: bool,
    /// Resolved to `-action_dim / 2` when the algorithm is built.
    #[serde(default)]
    pub target_entropy: Option<f32>,
    #[serde(default = "yes")]
    pub learnable_temp: bool,
    #[serde(default = "default_initial_temperature")]
    pub initial_temperature: f32,
    #[serde(default = "one")]
    pub actor_update_freq: usize,
    #[serde(default = "one")]
    pub target_update_freq: usize,

    /// Zero disables evaluation.
    #[serde(default = "default_eval_freq")]
    pub eval_freq: usize,
    #[serde(default = "default_eval_steps")]
    pub eval_steps: usize,
    #[serde(default = "default_num_eval_envs")]
    pub num_eval_envs: usize,
    /// Zero disables update metrics.
    #[serde(default = "default_log_freq")]
    pub log_freq: usize,
    /// Zero disables checkpoints.
    #[serde(default = "default_save_freq")]
    pub save_freq: usize,
}

fn one() -> usize {
    1
}

fn yes() -> bool {
    true
}

fn default_tau() -> f32 {
    0.005
}

fn default_discount() -> f32 {
    0.99
}

fn default_initial_temperature() -> f32 {
    1.0
}

fn default_eval_freq() -> usize {
    5000
}

fn default_eval_steps() -> usize {
    1000
}

fn default_num_eval_envs() -> usize {
    4
}

fn default_log_freq() -> usize {
    1000
}

fn default_save_freq() -> usize {
    100_000
}

impl SacConfig {
    pub fn new(
        num_seed_steps: usize,
        replay_buffer_capacity: usize,
        batch_size: usize,
        num_train_steps: usize,
        max_episode_length: usize,
    ) -> Self {
        Self {
            num_seed_steps,
            replay_buffer_capacity,
            batch_size,
            num_train_steps,
            max_episode_length,
            num_envs: one(),
            steps_per_env: one(),
            grad_updates_per_step: one(),
            tau: default_tau(),
            discount: default_discount(),
            backup_entropy: true,
            target_entropy: None,
            learnable_temp: true,
            initial_temperature: default_initial_temperature(),
            actor_update_freq: one(),
            target_update_freq: one(),
            eval_freq: default_eval_freq(),
            eval_steps: default_eval_steps(),
            num_eval_envs: default_num_eval_envs(),
            log_freq: default_log_freq(),
            save_freq: default_save_freq(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| SacError::config(format!("malformed SAC config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            SacError::config(format!("cannot read config {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("num_envs", self.num_envs),
            ("steps_per_env", self.steps_per_env),
            ("grad_updates_per_step", self.grad_updates_per_step),
            ("actor_update_freq", self.actor_update_freq),
            ("target_update_freq", self.target_update_freq),
            ("num_eval_envs", self.num_eval_envs),
            ("max_episode_length", self.max_episode_length),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SacError::config(format!("`{name}` must be positive")).into());
        }
        if self.replay_buffer_capacity < self.num_envs {
            return Err(SacError::config(format!(
                "replay_buffer_capacity {} is smaller than num_envs {}",
                self.replay_buffer_capacity, self.num_envs
            ))
            .into());
        }
        if !(self.tau > 0. && self.tau <= 1.) {
            return Err(SacError::config(format!("tau {} is outside (0, 1]", self.tau)).into());
        }
        if !(0. ..=1.).contains(&self.discount) {
            return Err(
                SacError::config(format!("discount {} is outside [0, 1]", self.discount)).into(),
            );
        }
        if self.initial_temperature <= 0. {
            return Err(SacError::config(format!(
                "initial_temperature {} must be positive",
                self.initial_temperature
            ))
            .into());
        }
        Ok(())
    }

    pub fn resolve_target_entropy(&mut self, action_dim: usize) -> f32 {
        *self
            .target_entropy
            .get_or_insert(-(action_dim as f32) / 2.)
    }
}
