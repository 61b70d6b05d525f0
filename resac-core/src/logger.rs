use anyhow::Result;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Scalar(f32),
    Array(Vec<f32>),
}

impl From<f32> for Metric {
    fn from(value: f32) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<f32>> for Metric {
    fn from(value: Vec<f32>) -> Self {
        Self::Array(value)
    }
}

/// Aggregated metrics keyed by `tag/name`.
pub type Stats = BTreeMap<String, f32>;

/// Metric sink of the training loop. How metrics are aggregated, printed or persisted is up to
/// the implementation.
pub trait Logger {
    /// Stores named metrics under a tag. With `append` the values are added to what is already
    /// stored under the same names, otherwise they replace it.
    fn store(&mut self, tag: &str, metrics: Vec<(&str, Metric)>, append: bool);

    fn log(&mut self, step: usize) -> Result<Stats>;

    fn reset(&mut self);
}

#[derive(Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn store(&mut self, _tag: &str, _metrics: Vec<(&str, Metric)>, _append: bool) {}

    fn log(&mut self, _step: usize) -> Result<Stats> {
        Ok(Stats::new())
    }

    fn reset(&mut self) {}
}
