use crate::tensors::{ActorLoss, CriticLoss, TargetQ, TempLoss};
use anyhow::{Result, anyhow, bail};
use candle_core::{Tensor, Var};
use candle_nn::VarMap;
use std::{collections::HashMap, sync::Mutex};

/// `reward + discount * mask * (min(Q1, Q2) - temp * log_prob)`, detached. The entropy term is
/// only subtracted when `backup_log_prob` is given.
pub fn critic_target(
    rewards: &Tensor,
    masks: &Tensor,
    (next_q1, next_q2): (&Tensor, &Tensor),
    backup_log_prob: Option<&Tensor>,
    temperature: f32,
    discount: f32,
) -> Result<TargetQ> {
    let mut next_value = next_q1.minimum(next_q2)?;
    if let Some(log_prob) = backup_log_prob {
        next_value = (next_value - (log_prob * temperature as f64)?)?;
    }
    let target = (rewards + ((masks * next_value)? * discount as f64)?)?;
    Ok(TargetQ(target.detach()))
}

/// Sum of the mean squared errors of both heads against the target.
pub fn critic_loss(q1: &Tensor, q2: &Tensor, target: &TargetQ) -> Result<CriticLoss> {
    let q1_loss = (q1 - &target.0)?.sqr()?.mean_all()?;
    let q2_loss = (q2 - &target.0)?.sqr()?.mean_all()?;
    Ok(CriticLoss((q1_loss + q2_loss)?))
}

/// `mean(temp * log_prob - min(Q1, Q2))` with the Q values taken at freshly sampled actions.
pub fn actor_loss(
    log_prob: &Tensor,
    q1: &Tensor,
    q2: &Tensor,
    temperature: f32,
) -> Result<ActorLoss> {
    let q = q1.minimum(q2)?;
    let loss = ((log_prob * temperature as f64)? - q)?.mean_all()?;
    Ok(ActorLoss(loss))
}

/// `temp * (entropy - target_entropy)`. Minimizing it lowers the temperature while the policy
/// is more random than the target and raises it otherwise.
pub fn temp_loss(temperature: &Tensor, entropy: f32, target_entropy: f32) -> Result<TempLoss> {
    let loss = (temperature * (entropy - target_entropy) as f64)?.mean_all()?;
    Ok(TempLoss(loss))
}

/// Polyak average `target <- tau * source + (1 - tau) * target`, matched by parameter name.
/// The two maps must not share their storage.
pub fn update_target(source: &VarMap, target: &VarMap, tau: f64) -> Result<()> {
    let source: &Mutex<HashMap<String, Var>> = source.data();
    let target: &Mutex<HashMap<String, Var>> = target.data();
    if std::ptr::eq(source, target) {
        bail!("target update needs two distinct varmaps");
    }
    let source = source
        .lock()
        .map_err(|_| anyhow!("source varmap lock is poisoned"))?;
    let target = target
        .lock()
        .map_err(|_| anyhow!("target varmap lock is poisoned"))?;
    for (name, target_var) in target.iter() {
        let Some(source_var) = source.get(name) else {
            bail!("target parameter `{name}` has no source counterpart");
        };
        let mixed = ((source_var.as_tensor() * tau)? + (target_var.as_tensor() * (1. - tau))?)?;
        target_var.set(&mixed)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{actor_loss, critic_loss, critic_target, temp_loss, update_target};
    use crate::{optimizer::OptimizerWithMaxGrad, sac::temperature::LogTemperature};
    use crate::sac::critic::TwinQCritic;
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use resac_core::policies::Temperature;
    use std::collections::BTreeMap;

    fn critic() -> Result<(VarMap, TwinQCritic)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let critic = TwinQCritic::build(3, 1, &[8], &vb)?;
        Ok((varmap, critic))
    }

    fn snapshot(varmap: &VarMap) -> Result<BTreeMap<String, Vec<f32>>> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?;
        data.iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().flatten_all()?.to_vec1()?)))
            .collect()
    }

    #[test]
    fn full_tau_copies_the_source() -> Result<()> {
        let (source, _) = critic()?;
        let (target, _) = critic()?;
        update_target(&source, &target, 1.)?;
        assert_eq!(snapshot(&target)?, snapshot(&source)?);
        Ok(())
    }

    #[test]
    fn zero_tau_keeps_the_target() -> Result<()> {
        let (source, _) = critic()?;
        let (target, _) = critic()?;
        let before = snapshot(&target)?;
        update_target(&source, &target, 0.)?;
        assert_eq!(snapshot(&target)?, before);
        assert_ne!(snapshot(&source)?, before);
        Ok(())
    }

    #[test]
    fn shared_varmap_is_rejected() -> Result<()> {
        let (source, _) = critic()?;
        let before = snapshot(&source)?;
        assert!(update_target(&source, &source.clone(), 0.5).is_err());
        assert!(update_target(&source, &source, 1.).is_err());
        assert_eq!(snapshot(&source)?, before);
        Ok(())
    }

    #[test]
    fn partial_tau_interpolates() -> Result<()> {
        let (source, _) = critic()?;
        let (target, _) = critic()?;
        let (src, tgt) = (snapshot(&source)?, snapshot(&target)?);
        update_target(&source, &target, 0.25)?;
        for (name, mixed) in snapshot(&target)? {
            for ((m, s), t) in mixed.iter().zip(&src[&name]).zip(&tgt[&name]) {
                assert!((m - (0.25 * s + 0.75 * t)).abs() < 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn critic_loss_is_zero_on_exact_targets() -> Result<()> {
        let device = Device::Cpu;
        let rewards = Tensor::new(&[1f32, 0., -1., 2.], &device)?;
        let masks = Tensor::new(&[1f32, 0., 1., 1.], &device)?;
        let next_q1 = Tensor::new(&[3f32, 5., 0.5, -1.], &device)?;
        let next_q2 = Tensor::new(&[2f32, 6., 1.5, -2.], &device)?;
        let log_prob = Tensor::new(&[0.5f32, 0.1, -0.5, 1.], &device)?;
        let target = critic_target(
            &rewards,
            &masks,
            (&next_q1, &next_q2),
            Some(&log_prob),
            0.5,
            0.9,
        )?;
        // reward + 0.9 * mask * (min - 0.5 * log_prob)
        let expected = [
            1. + 0.9 * (2. - 0.25),
            0.,
            -1. + 0.9 * (0.5 + 0.25),
            2. + 0.9 * (-2. - 0.5),
        ];
        for (got, want) in target.to_vec1::<f32>()?.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }

        let exact = critic_loss(&target, &target, &target)?;
        assert_eq!(exact.to_scalar::<f32>()?, 0.);

        let off_by_one = (&target.0 + 1.)?;
        let loss = critic_loss(&off_by_one, &target, &target)?;
        assert!((loss.to_scalar::<f32>()? - 1.).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn no_entropy_backup_without_log_prob() -> Result<()> {
        let device = Device::Cpu;
        let ones = Tensor::ones(2, DType::F32, &device)?;
        let target = critic_target(&ones, &ones, (&ones, &ones), None, 10., 1.)?;
        assert_eq!(target.to_vec1::<f32>()?, vec![2., 2.]);
        Ok(())
    }

    #[test]
    fn actor_loss_uses_the_smaller_head() -> Result<()> {
        let device = Device::Cpu;
        let log_prob = Tensor::new(&[1f32, -1.], &device)?;
        let q1 = Tensor::new(&[2f32, 0.], &device)?;
        let q2 = Tensor::new(&[3f32, -4.], &device)?;
        let loss = actor_loss(&log_prob, &q1, &q2, 0.5)?;
        // mean(0.5 * [1, -1] - [2, -4]) = mean([-1.5, 3.5])
        assert!((loss.to_scalar::<f32>()? - 1.).abs() < 1e-6);
        Ok(())
    }

    fn stepped_temperature(entropy: f32, target_entropy: f32) -> Result<f32> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let temperature = LogTemperature::build(1., &vb)?;
        let mut optimizer = OptimizerWithMaxGrad::adam(varmap, 1e-2, None)?;
        let loss = temp_loss(&temperature.temperature()?, entropy, target_entropy)?;
        optimizer.backward_step(&loss)?;
        temperature.value()
    }

    #[test]
    fn temperature_moves_against_the_entropy_gap() -> Result<()> {
        assert!(stepped_temperature(2., -1.)? < 1.);
        assert!(stepped_temperature(-3., -1.)? > 1.);
        Ok(())
    }
}
