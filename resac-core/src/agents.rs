use crate::buffers::replay_buffer::TransitionBatch;
use crate::policies::StochasticActor;
use crate::rng::RngKey;
use anyhow::Result;
use std::path::Path;

/// Which optional sub-updates run in one cycle. The critic always updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateFlags {
    pub update_actor: bool,
    pub update_target: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CriticUpdateAux {
    pub critic_loss: f32,
    pub q1: f32,
    pub q2: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActorUpdateAux {
    pub actor_loss: f32,
    pub entropy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TempUpdateAux {
    pub temp: f32,
    /// `None` when the temperature did not take a step this cycle.
    pub temp_loss: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UpdateAux {
    pub critic: CriticUpdateAux,
    pub actor: Option<ActorUpdateAux>,
    pub temp: TempUpdateAux,
    pub target_updated: bool,
}

/// An agent trained from replayed transitions. `update` consumes the old parameter state and
/// hands back the new one, so callers always reassign.
pub trait OffPolicyAgent: Sized {
    type Actor: StochasticActor;

    fn actor(&self) -> &Self::Actor;

    fn update(
        self,
        key: RngKey,
        batch: &TransitionBatch,
        flags: UpdateFlags,
    ) -> Result<(Self, UpdateAux)>;

    fn save(&self, dir: &Path) -> Result<()>;
}
