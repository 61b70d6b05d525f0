use anyhow::Result;
use candle_core::{Tensor, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use std::fmt::Debug;

fn clip_grad(mut grad_store: GradStore, varmap: &VarMap, max_norm: f32) -> Result<GradStore> {
    let all_vars = varmap.all_vars();
    let mut total_norm_squared = 0.0f32;
    for var in all_vars.iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
        for var in all_vars.iter() {
            if let Some(old_grad) = grad_store.get(var.as_tensor()) {
                let new_grad = (old_grad * clip_coef)?;
                grad_store.insert(var.as_tensor(), new_grad);
            }
        }
    }
    Ok(grad_store)
}

/// AdamW over one parameter bundle. Gradients and the optimizer step are separate calls so a
/// caller can compute every loss of an update before touching any parameter.
pub struct OptimizerWithMaxGrad {
    pub optimizer: AdamW,
    pub max_grad_norm: Option<f32>,
    pub varmap: VarMap,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(optimizer: AdamW, max_grad_norm: Option<f32>, varmap: VarMap) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            varmap,
        }
    }

    /// AdamW without weight decay over every variable of `varmap`.
    pub fn adam(varmap: VarMap, lr: f64, max_grad_norm: Option<f32>) -> Result<Self> {
        let params = ParamsAdamW {
            lr,
            weight_decay: 0.,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        Ok(Self::new(optimizer, max_grad_norm, varmap))
    }

    pub fn grads(&self, loss: &Tensor) -> Result<GradStore> {
        let grads = loss.backward()?;
        match self.max_grad_norm {
            Some(max_norm) => clip_grad(grads, &self.varmap, max_norm),
            None => Ok(grads),
        }
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.optimizer.step(grads)?;
        Ok(())
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = self.grads(loss)?;
        self.step(&grads)
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }
}
