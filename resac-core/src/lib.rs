pub mod agents;
pub mod buffers;
pub mod config;
pub mod env;
pub mod error;
pub mod evaluation;
pub mod logger;
pub mod off_policy_algorithm;
pub mod policies;
pub mod rng;

use anyhow::Result;
use rng::RngKey;

/// A learning algorithm. `OffPolicyAlgorithm` is the only implementor for now; it consumes
/// itself since the agent it trains moves through every update by value.
pub trait Algorithm {
    type Outcome;

    fn train(self, key: RngKey) -> Result<Self::Outcome>;
}
