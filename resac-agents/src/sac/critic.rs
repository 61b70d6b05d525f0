use crate::sequential::{Sequential, build_mlp};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};
use resac_core::policies::TwinCritic;

/// Two independent Q networks over `concat(obs, action)`.
#[derive(Debug, Clone)]
pub struct TwinQCritic {
    q1: Sequential,
    q2: Sequential,
}

impl TwinQCritic {
    pub fn build(
        obs_dim: usize,
        action_dim: usize,
        hidden: &[usize],
        vb: &VarBuilder,
    ) -> Result<Self> {
        let input_dim = obs_dim + action_dim;
        Ok(Self {
            q1: build_mlp(input_dim, hidden, 1, vb, "q1_")?,
            q2: build_mlp(input_dim, hidden, 1, vb, "q2_")?,
        })
    }
}

impl TwinCritic for TwinQCritic {
    fn evaluate(&self, obs: &Tensor, action: &Tensor) -> Result<(Tensor, Tensor)> {
        let input = Tensor::cat(&[obs, action], 1)?;
        let q1 = self.q1.forward(&input)?.squeeze(1)?;
        let q2 = self.q2.forward(&input)?.squeeze(1)?;
        Ok((q1, q2))
    }
}
