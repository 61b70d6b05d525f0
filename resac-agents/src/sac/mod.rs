pub mod actor;
pub mod config;
pub mod critic;
pub mod loss;
pub mod temperature;

use crate::optimizer::OptimizerWithMaxGrad;
use actor::DiagGaussianActor;
use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use config::SacNetworkConfig;
use critic::TwinQCritic;
use loss::{actor_loss, critic_loss, critic_target, temp_loss, update_target};
use resac_core::{
    agents::{
        ActorUpdateAux, CriticUpdateAux, OffPolicyAgent, TempUpdateAux, UpdateAux, UpdateFlags,
    },
    buffers::replay_buffer::TransitionBatch,
    config::SacConfig,
    env::EnvMeta,
    error::SacError,
    policies::{StochasticActor, Temperature, TwinCritic},
    rng::RngKey,
};
use std::path::Path;
use temperature::LogTemperature;
use tracing::debug;

/// The parts of `SacConfig` an update cycle reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SacParams {
    pub discount: f32,
    pub tau: f32,
    pub backup_entropy: bool,
    pub learnable_temp: bool,
    pub target_entropy: f32,
}

impl SacParams {
    pub fn from_config(config: &SacConfig, action_dim: usize) -> Self {
        Self {
            discount: config.discount,
            tau: config.tau,
            backup_entropy: config.backup_entropy,
            learnable_temp: config.learnable_temp,
            target_entropy: config
                .target_entropy
                .unwrap_or(-(action_dim as f32) / 2.),
        }
    }
}

fn scalar(t: &Tensor) -> Result<f32> {
    Ok(t.to_dtype(DType::F32)?.mean_all()?.to_scalar::<f32>()?)
}

/// Candle SAC agent: tanh-Gaussian actor, twin critic with a Polyak target and a learnable
/// log temperature, each bundle with its own AdamW.
pub struct Sac {
    actor: DiagGaussianActor,
    critic: TwinQCritic,
    target_critic: TwinQCritic,
    temperature: LogTemperature,
    actor_optimizer: OptimizerWithMaxGrad,
    critic_optimizer: OptimizerWithMaxGrad,
    temp_optimizer: OptimizerWithMaxGrad,
    target_varmap: VarMap,
    params: SacParams,
}

impl Sac {
    pub fn build(
        meta: &EnvMeta,
        config: &SacConfig,
        network: &SacNetworkConfig,
        device: &Device,
    ) -> Result<Self> {
        let Some((low, high)) = meta.action_bounds() else {
            return Err(
                SacError::UnsupportedSpace("SAC needs a continuous action space".into()).into(),
            );
        };
        let obs_dim = meta.observation_size();
        let action_dim = meta.action_dim();

        let actor_varmap = VarMap::new();
        let actor_vb = VarBuilder::from_varmap(&actor_varmap, DType::F32, device);
        let actor = DiagGaussianActor::build(
            obs_dim,
            &network.actor_hidden,
            (&low, &high),
            (network.log_std_min, network.log_std_max),
            &actor_vb,
            device,
        )?;

        let critic_varmap = VarMap::new();
        let critic_vb = VarBuilder::from_varmap(&critic_varmap, DType::F32, device);
        let critic = TwinQCritic::build(obs_dim, action_dim, &network.critic_hidden, &critic_vb)?;

        let target_varmap = VarMap::new();
        let target_vb = VarBuilder::from_varmap(&target_varmap, DType::F32, device);
        let target_critic =
            TwinQCritic::build(obs_dim, action_dim, &network.critic_hidden, &target_vb)?;
        update_target(&critic_varmap, &target_varmap, 1.)?;

        let temp_varmap = VarMap::new();
        let temp_vb = VarBuilder::from_varmap(&temp_varmap, DType::F32, device);
        let temperature = LogTemperature::build(config.initial_temperature, &temp_vb)?;

        let max_grad_norm = network.max_grad_norm;
        let actor_optimizer =
            OptimizerWithMaxGrad::adam(actor_varmap, network.actor_lr, max_grad_norm)?;
        let critic_optimizer =
            OptimizerWithMaxGrad::adam(critic_varmap, network.critic_lr, max_grad_norm)?;
        let temp_optimizer = OptimizerWithMaxGrad::adam(temp_varmap, network.temp_lr, None)?;
        Ok(Self {
            actor,
            critic,
            target_critic,
            temperature,
            actor_optimizer,
            critic_optimizer,
            temp_optimizer,
            target_varmap,
            params: SacParams::from_config(config, action_dim),
        })
    }

    pub fn params(&self) -> &SacParams {
        &self.params
    }

    pub fn critic(&self) -> &TwinQCritic {
        &self.critic
    }

    pub fn target_critic(&self) -> &TwinQCritic {
        &self.target_critic
    }

    pub fn temperature(&self) -> &LogTemperature {
        &self.temperature
    }

    fn bundles(&self) -> [(&'static str, &VarMap); 4] {
        [
            ("actor", &self.actor_optimizer.varmap),
            ("critic", &self.critic_optimizer.varmap),
            ("target_critic", &self.target_varmap),
            ("temperature", &self.temp_optimizer.varmap),
        ]
    }

    /// Loads weights written by `save`. Optimizer moments are not part of a checkpoint.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        for (name, varmap) in [
            ("actor", &mut self.actor_optimizer.varmap),
            ("critic", &mut self.critic_optimizer.varmap),
            ("target_critic", &mut self.target_varmap),
            ("temperature", &mut self.temp_optimizer.varmap),
        ] {
            let path = dir.join(format!("{name}.safetensors"));
            varmap
                .load(&path)
                .map_err(|err| anyhow!("cannot load {}: {err}", path.display()))?;
        }
        Ok(())
    }
}

impl OffPolicyAgent for Sac {
    type Actor = DiagGaussianActor;

    fn actor(&self) -> &DiagGaussianActor {
        &self.actor
    }

    fn update(
        mut self,
        key: RngKey,
        batch: &TransitionBatch,
        flags: UpdateFlags,
    ) -> Result<(Self, UpdateAux)> {
        let SacParams {
            discount,
            tau,
            backup_entropy,
            learnable_temp,
            target_entropy,
        } = self.params;
        let (critic_key, actor_key) = key.split();
        let temp = self.temperature.value()?;

        // critic, bootstrapped through the actor before this cycle's step
        let (next_actions, next_log_prob) =
            self.actor.sample(critic_key, &batch.next_observations)?;
        let (next_actions, next_log_prob) = (next_actions.detach(), next_log_prob.detach());
        let (next_q1, next_q2) = self
            .target_critic
            .evaluate(&batch.next_observations, &next_actions)?;
        let target = critic_target(
            &batch.rewards,
            &batch.masks,
            (&next_q1, &next_q2),
            backup_entropy.then_some(&next_log_prob),
            temp,
            discount,
        )?;
        let (q1, q2) = self.critic.evaluate(&batch.observations, &batch.actions)?;
        let critic_loss = critic_loss(&q1, &q2, &target)?;
        let critic_grads = self.critic_optimizer.grads(&critic_loss)?;
        let critic_aux = CriticUpdateAux {
            critic_loss: scalar(&critic_loss)?,
            q1: scalar(&q1)?,
            q2: scalar(&q2)?,
        };

        if flags.update_target {
            update_target(&self.critic_optimizer.varmap, &self.target_varmap, tau as f64)?;
        }

        let mut actor_step = None;
        let mut temp_step = None;
        let mut temp_aux = TempUpdateAux {
            temp,
            temp_loss: None,
        };
        if flags.update_actor {
            let (actions, log_prob) = self.actor.sample(actor_key, &batch.observations)?;
            let (q1, q2) = self.critic.evaluate(&batch.observations, &actions)?;
            let loss = actor_loss(&log_prob, &q1, &q2, temp)?;
            let entropy = -scalar(&log_prob)?;
            actor_step = Some((
                self.actor_optimizer.grads(&loss)?,
                ActorUpdateAux {
                    actor_loss: scalar(&loss)?,
                    entropy,
                },
            ));
            if learnable_temp {
                let loss = temp_loss(&self.temperature.temperature()?, entropy, target_entropy)?;
                temp_step = Some(self.temp_optimizer.grads(&loss)?);
                temp_aux.temp_loss = Some(scalar(&loss)?);
            }
        }

        // every gradient above comes from the pre-update parameters
        self.critic_optimizer.step(&critic_grads)?;
        let actor_aux = match actor_step {
            Some((grads, aux)) => {
                self.actor_optimizer.step(&grads)?;
                Some(aux)
            }
            None => None,
        };
        if let Some(grads) = temp_step {
            self.temp_optimizer.step(&grads)?;
        }
        debug!(critic_loss = critic_aux.critic_loss, temp, "sac update");

        let aux = UpdateAux {
            critic: critic_aux,
            actor: actor_aux,
            temp: temp_aux,
            target_updated: flags.update_target,
        };
        Ok((self, aux))
    }

    /// One safetensors file per parameter bundle.
    fn save(&self, dir: &Path) -> Result<()> {
        for (name, varmap) in self.bundles() {
            let path = dir.join(format!("{name}.safetensors"));
            varmap
                .save(&path)
                .map_err(|err| anyhow!("cannot save {}: {err}", path.display()))?;
        }
        Ok(())
    }
}
