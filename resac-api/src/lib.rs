// builders + native environments + metric sink
pub mod builders;
pub mod envs;
pub mod logger;
#[cfg(feature = "test-utils")]
pub mod test_utils;
