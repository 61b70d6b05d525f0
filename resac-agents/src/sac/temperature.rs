use anyhow::{Result, ensure};
use candle_core::Tensor;
use candle_nn::{Init, VarBuilder};
use resac_core::policies::Temperature;

/// Entropy temperature stored as `log_temp`, so it stays positive under any gradient step.
#[derive(Debug, Clone)]
pub struct LogTemperature {
    log_temp: Tensor,
}

impl LogTemperature {
    pub fn build(initial_temperature: f32, vb: &VarBuilder) -> Result<Self> {
        ensure!(
            initial_temperature > 0.,
            "initial temperature must be positive, got {initial_temperature}"
        );
        let init = Init::Const(initial_temperature.ln() as f64);
        let log_temp = vb.get_with_hints(1, "log_temp", init)?;
        Ok(Self { log_temp })
    }

    /// The temperature as a differentiable `[1]` tensor.
    pub fn temperature(&self) -> Result<Tensor> {
        Ok(self.log_temp.exp()?)
    }
}

impl Temperature for LogTemperature {
    fn value(&self) -> Result<f32> {
        Ok(self.temperature()?.sum_all()?.to_scalar::<f32>()?)
    }
}
