pub mod optimizer;
pub mod sac;
pub mod sequential;
pub mod tensors;
