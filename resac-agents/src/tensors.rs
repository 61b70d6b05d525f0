use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

/// Stop-gradient Bellman target, `[batch]`.
#[derive(Deref, DerefMut, Debug, Display)]
pub struct TargetQ(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct CriticLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct ActorLoss(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display)]
pub struct TempLoss(pub Tensor);
