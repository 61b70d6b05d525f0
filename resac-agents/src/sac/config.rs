use serde::{Deserialize, Serialize};

/// Network sizes and optimizer settings for the candle SAC agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SacNetworkConfig {
    pub actor_hidden: Vec<usize>,
    pub critic_hidden: Vec<usize>,
    pub actor_lr: f64,
    pub critic_lr: f64,
    pub temp_lr: f64,
    pub max_grad_norm: Option<f32>,
    pub log_std_min: f32,
    pub log_std_max: f32,
}

impl Default for SacNetworkConfig {
    fn default() -> Self {
        Self {
            actor_hidden: vec![256, 256],
            critic_hidden: vec![256, 256],
            actor_lr: 3e-4,
            critic_lr: 3e-4,
            temp_lr: 3e-4,
            max_grad_norm: None,
            log_std_min: -5.,
            log_std_max: 2.,
        }
    }
}
