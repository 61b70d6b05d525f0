pub mod env;
pub mod sac;
