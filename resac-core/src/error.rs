use candle_core::DType;
use thiserror::Error;

/// Failures the core reports itself. Everything else (candle, the environment, pyo3) is
/// propagated untouched through `anyhow`.
#[derive(Debug, Error)]
pub enum SacError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("replay buffer has no field named `{0}`")]
    UnknownField(String),

    #[error("replay buffer field `{0}` was not provided")]
    MissingField(String),

    #[error("field `{field}` expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        field: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("field `{field}` expected dtype {expected:?}, got {actual:?}")]
    DTypeMismatch {
        field: String,
        expected: DType,
        actual: DType,
    },

    #[error("cannot sample from an empty replay buffer")]
    EmptyBuffer,

    #[error("unsupported space: {0}")]
    UnsupportedSpace(String),
}

impl SacError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
