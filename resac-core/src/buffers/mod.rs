pub mod replay_buffer;

pub const ENV_OBS: &str = "env_obs";
pub const ACTION: &str = "action";
pub const REWARD: &str = "reward";
pub const MASK: &str = "mask";
pub const NEXT_ENV_OBS: &str = "next_env_obs";
