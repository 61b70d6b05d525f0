use crate::sequential::{Sequential, build_mlp};
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use candle_nn::{Module, VarBuilder};
use rand::Rng;
use rand_distr::StandardNormal;
use resac_core::{policies::StochasticActor, rng::RngKey};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Tanh-squashed diagonal Gaussian. The network outputs the mean and the log-std of every
/// action dimension; samples are squashed into `(-1, 1)` and rescaled to the action bounds.
#[derive(Debug, Clone)]
pub struct DiagGaussianActor {
    net: Sequential,
    action_dim: usize,
    log_std_min: f32,
    log_std_max: f32,
    action_scale: Tensor,
    action_bias: Tensor,
}

impl DiagGaussianActor {
    pub fn build(
        obs_dim: usize,
        hidden: &[usize],
        (low, high): (&[f32], &[f32]),
        (log_std_min, log_std_max): (f32, f32),
        vb: &VarBuilder,
        device: &Device,
    ) -> Result<Self> {
        ensure!(
            low.len() == high.len() && !low.is_empty(),
            "action bounds must be non-empty and of equal length"
        );
        ensure!(log_std_min < log_std_max, "log-std range is empty");
        let action_dim = low.len();
        let scale: Vec<f32> = low.iter().zip(high).map(|(lo, hi)| (hi - lo) / 2.).collect();
        let bias: Vec<f32> = low.iter().zip(high).map(|(lo, hi)| (hi + lo) / 2.).collect();
        let net = build_mlp(obs_dim, hidden, 2 * action_dim, vb, "actor")?;
        Ok(Self {
            net,
            action_dim,
            log_std_min,
            log_std_max,
            action_scale: Tensor::from_vec(scale, action_dim, device)?,
            action_bias: Tensor::from_vec(bias, action_dim, device)?,
        })
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Mean and bounded log-std, both `[batch, action_dim]`.
    pub fn mean_and_log_std(&self, obs: &Tensor) -> Result<(Tensor, Tensor)> {
        let out = self.net.forward(obs)?;
        let mean = out.narrow(1, 0, self.action_dim)?;
        let half_range = 0.5 * (self.log_std_max - self.log_std_min) as f64;
        let log_std = out
            .narrow(1, self.action_dim, self.action_dim)?
            .tanh()?
            .affine(half_range, self.log_std_min as f64 + half_range)?;
        Ok((mean, log_std))
    }

    fn rescale(&self, squashed: &Tensor) -> Result<Tensor> {
        Ok(squashed
            .broadcast_mul(&self.action_scale)?
            .broadcast_add(&self.action_bias)?)
    }
}

impl StochasticActor for DiagGaussianActor {
    fn sample(&self, key: RngKey, obs: &Tensor) -> Result<(Tensor, Tensor)> {
        let (mean, log_std) = self.mean_and_log_std(obs)?;
        let (batch, action_dim) = mean.dims2()?;
        let mut rng = key.into_rng();
        let noise: Vec<f32> = (0..batch * action_dim)
            .map(|_| rng.sample(StandardNormal))
            .collect();
        let noise = Tensor::from_vec(noise, (batch, action_dim), mean.device())?;
        let pre_tanh = (&mean + (log_std.exp()? * &noise)?)?;
        let squashed = pre_tanh.tanh()?;

        let gaussian_log_prob = ((noise.sqr()? * -0.5)? - &log_std)?
            .affine(1., -0.5 * LN_2PI)?
            .sum(1)?;
        // change of variables through tanh and the bound rescaling
        let log_det = (squashed.sqr()?.neg()? + 1.)?
            .broadcast_mul(&self.action_scale)?
            .affine(1., 1e-6)?
            .log()?
            .sum(1)?;
        let log_prob = (gaussian_log_prob - log_det)?;
        Ok((self.rescale(&squashed)?, log_prob))
    }

    fn act(&self, obs: &Tensor) -> Result<Tensor> {
        let (mean, _) = self.mean_and_log_std(obs)?;
        self.rescale(&mean.tanh()?)
    }
}

#[cfg(test)]
mod test {
    use super::{DiagGaussianActor, LN_2PI};
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use resac_core::{policies::StochasticActor, rng::RngKey};

    fn actor(low: &[f32], high: &[f32]) -> Result<(VarMap, DiagGaussianActor)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let actor = DiagGaussianActor::build(3, &[16], (low, high), (-5., 2.), &vb, &Device::Cpu)?;
        Ok((varmap, actor))
    }

    fn obs() -> Result<Tensor> {
        Ok(Tensor::randn(0f32, 1., (8, 3), &Device::Cpu)?)
    }

    #[test]
    fn same_key_same_sample() -> Result<()> {
        let (_varmap, actor) = actor(&[-1., -1.], &[1., 1.])?;
        let obs = obs()?;
        let (a, log_a) = actor.sample(RngKey::new(9), &obs)?;
        let (b, log_b) = actor.sample(RngKey::new(9), &obs)?;
        let (c, _) = actor.sample(RngKey::new(10), &obs)?;
        assert_eq!(a.to_vec2::<f32>()?, b.to_vec2::<f32>()?);
        assert_eq!(log_a.to_vec1::<f32>()?, log_b.to_vec1::<f32>()?);
        assert_ne!(a.to_vec2::<f32>()?, c.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn actions_stay_within_bounds() -> Result<()> {
        let (_varmap, actor) = actor(&[-2., 0.], &[2., 1.])?;
        let obs = obs()?;
        let (sampled, log_prob) = actor.sample(RngKey::new(1), &obs)?;
        assert_eq!(sampled.dims(), &[8, 2]);
        assert_eq!(log_prob.dims(), &[8]);
        for action in [sampled, actor.act(&obs)?] {
            for row in action.to_vec2::<f32>()? {
                assert!((-2.0..=2.0).contains(&row[0]));
                assert!((0.0..=1.0).contains(&row[1]));
            }
        }
        assert!(log_prob.to_vec1::<f32>()?.iter().all(|lp| lp.is_finite()));
        Ok(())
    }

    #[test]
    fn log_prob_matches_squashed_gaussian_density() -> Result<()> {
        let (_varmap, actor) = actor(&[-1.], &[1.])?;
        let obs = obs()?;
        let key = RngKey::new(4);
        let (action, log_prob) = actor.sample(key.clone(), &obs)?;
        let (mean, log_std) = actor.mean_and_log_std(&obs)?;
        let mean = mean.flatten_all()?.to_vec1::<f32>()?;
        let log_std = log_std.flatten_all()?.to_vec1::<f32>()?;
        let action = action.flatten_all()?.to_vec1::<f32>()?;
        for (idx, lp) in log_prob.to_vec1::<f32>()?.into_iter().enumerate() {
            let a = action[idx] as f64;
            let u = a.atanh();
            let z = (u - mean[idx] as f64) / (log_std[idx] as f64).exp();
            let expected =
                -0.5 * z * z - log_std[idx] as f64 - 0.5 * LN_2PI - (1. - a * a + 1e-6).ln();
            // atanh loses precision close to the bounds
            if a.abs() < 0.99 {
                assert!((lp as f64 - expected).abs() < 1e-2, "{lp} vs {expected}");
            }
        }
        Ok(())
    }
}
