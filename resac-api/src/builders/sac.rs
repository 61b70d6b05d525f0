use crate::builders::env::EnvKind;
use anyhow::Result;
use candle_core::Device;
use resac_agents::sac::{Sac, config::SacNetworkConfig};
use resac_core::{
    config::SacConfig,
    env::EnvAdapter,
    error::SacError,
    logger::Logger,
    off_policy_algorithm::OffPolicyAlgorithm,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk run description: loop hyperparameters plus the candle network settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub sac: SacConfig,
    #[serde(default)]
    pub network: SacNetworkConfig,
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| SacError::config(format!("cannot parse run config: {err}")))?;
        config.sac.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| SacError::config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_json_str(&json)
    }
}

pub struct SacBuilder {
    pub config: SacConfig,
    pub network: SacNetworkConfig,
    pub device: Device,
    pub checkpoint_dir: Option<PathBuf>,
}

impl SacBuilder {
    pub fn new(config: SacConfig) -> Self {
        Self {
            config,
            network: SacNetworkConfig::default(),
            device: Device::Cpu,
            checkpoint_dir: None,
        }
    }

    pub fn from_run_config(run: RunConfig) -> Self {
        Self {
            network: run.network,
            ..Self::new(run.sac)
        }
    }

    pub fn with_network(mut self, network: SacNetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn build<E: EnvAdapter, L: Logger>(
        &self,
        env: E,
        eval_env: Option<E>,
        logger: L,
    ) -> Result<OffPolicyAlgorithm<Sac, E, L>> {
        self.config.validate()?;
        let meta = env.env_meta();
        let agent = Sac::build(&meta, &self.config, &self.network, &self.device)?;
        let algo = OffPolicyAlgorithm::new(
            agent,
            env,
            eval_env,
            logger,
            self.config.clone(),
            &self.device,
        )?;
        Ok(match &self.checkpoint_dir {
            Some(dir) => algo.with_checkpoint_dir(dir),
            None => algo,
        })
    }

    /// Training and evaluation environments of `kind`, sized from the config. No evaluation
    /// environment is built when evaluation is disabled.
    pub fn build_for<L: Logger>(
        &self,
        kind: &EnvKind,
        logger: L,
    ) -> Result<OffPolicyAlgorithm<Sac, Box<dyn EnvAdapter>, L>> {
        let config = &self.config;
        let env = kind.build(config.num_envs, config.max_episode_length, &self.device)?;
        let eval_env = if config.eval_freq > 0 {
            Some(kind.build(config.num_eval_envs, config.max_episode_length, &self.device)?)
        } else {
            None
        };
        self.build(env, eval_env, logger)
    }
}

#[cfg(test)]
mod test {
    use super::{RunConfig, SacBuilder};
    use crate::builders::env::EnvKind;
    use anyhow::Result;
    use resac_agents::sac::config::SacNetworkConfig;
    use resac_core::{env::EnvAdapter, error::SacError, logger::NoopLogger};

    #[test]
    fn run_config_fills_network_defaults() -> Result<()> {
        let run = RunConfig::from_json_str(
            r#"{"sac": {"num_seed_steps": 5, "replay_buffer_capacity": 100, "batch_size": 8,
                "num_train_steps": 20, "max_episode_length": 200}}"#,
        )?;
        assert_eq!(run.network, SacNetworkConfig::default());
        assert_eq!(run.sac.tau, 0.005);

        let run = RunConfig::from_json_str(
            r#"{"sac": {"num_seed_steps": 5, "replay_buffer_capacity": 100, "batch_size": 8,
                "num_train_steps": 20, "max_episode_length": 200},
                "network": {"actor_hidden": [32]}}"#,
        )?;
        assert_eq!(run.network.actor_hidden, vec![32]);
        assert_eq!(run.network.critic_hidden, vec![256, 256]);
        Ok(())
    }

    #[test]
    fn run_config_rejects_bad_input() {
        for json in [
            r#"{"sac": {"num_seed_steps": 5}}"#,
            r#"{"sac": {"num_seed_steps": 5, "replay_buffer_capacity": 100, "batch_size": 8,
                "num_train_steps": 20, "max_episode_length": 200}, "extra": 1}"#,
            r#"{"sac": {"num_seed_steps": 5, "replay_buffer_capacity": 100, "batch_size": 8,
                "num_train_steps": 20, "max_episode_length": 200, "tau": 0.0}}"#,
        ] {
            let err = RunConfig::from_json_str(json).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<SacError>(),
                Some(SacError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn builds_the_pendulum_algorithm() -> Result<()> {
        let mut config = resac_core::config::SacConfig::new(5, 100, 8, 20, 50);
        config.num_envs = 2;
        config.num_eval_envs = 3;
        let builder = SacBuilder::new(config).with_network(SacNetworkConfig {
            actor_hidden: vec![8],
            critic_hidden: vec![8],
            ..Default::default()
        });
        let algo = builder.build_for(&EnvKind::Pendulum, NoopLogger)?;
        assert_eq!(algo.env.num_envs(), 2);
        assert_eq!(algo.eval_env.as_ref().map(|env| env.num_envs()), Some(3));
        assert_eq!(algo.config.target_entropy, Some(-0.5));
        assert!(algo.replay_buffer.is_empty());
        Ok(())
    }
}
