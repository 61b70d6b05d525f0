use anyhow::Result;
use resac_core::logger::{Logger, Metric, Stats};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::info;

#[derive(Serialize)]
struct LogLine<'a> {
    step: usize,
    #[serde(flatten)]
    stats: &'a Stats,
}

fn summarize(key: &str, values: &[f32], stats: &mut Stats) {
    if values.is_empty() {
        return;
    }
    let n = values.len() as f32;
    let avg = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f32>() / n;
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    stats.insert(format!("{key}_avg"), avg);
    stats.insert(format!("{key}_std"), var.sqrt());
    stats.insert(format!("{key}_min"), min);
    stats.insert(format!("{key}_max"), max);
}

/// Aggregates stored metrics into `tag/name` statistics, reports them through `tracing` and
/// optionally appends each logged step as a JSON line.
#[derive(Default)]
pub struct StatsLogger {
    stored: BTreeMap<String, Metric>,
    history: Vec<(usize, Stats)>,
    json_lines: Option<BufWriter<File>>,
}

impl StatsLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json_lines(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        self.json_lines = Some(BufWriter::new(file));
        Ok(self)
    }

    pub fn history(&self) -> &[(usize, Stats)] {
        &self.history
    }

    /// Latest logged value of `key`, if any step logged it.
    pub fn last(&self, key: &str) -> Option<f32> {
        self.history
            .iter()
            .rev()
            .find_map(|(_, stats)| stats.get(key).copied())
    }
}

impl Logger for StatsLogger {
    fn store(&mut self, tag: &str, metrics: Vec<(&str, Metric)>, append: bool) {
        for (name, metric) in metrics {
            let key = format!("{tag}/{name}");
            let merged = match (append, self.stored.remove(&key)) {
                (true, Some(previous)) => {
                    let mut values = match previous {
                        Metric::Scalar(value) => vec![value],
                        Metric::Array(values) => values,
                    };
                    match metric {
                        Metric::Scalar(value) => values.push(value),
                        Metric::Array(more) => values.extend(more),
                    }
                    Metric::Array(values)
                }
                _ => metric,
            };
            self.stored.insert(key, merged);
        }
    }

    fn log(&mut self, step: usize) -> Result<Stats> {
        let mut stats = Stats::new();
        for (key, metric) in &self.stored {
            match metric {
                Metric::Scalar(value) => {
                    stats.insert(key.clone(), *value);
                }
                Metric::Array(values) => summarize(key, values, &mut stats),
            }
        }
        if stats.is_empty() {
            return Ok(stats);
        }
        info!(step, stats = ?stats, "metrics");
        if let Some(writer) = self.json_lines.as_mut() {
            serde_json::to_writer(&mut *writer, &LogLine { step, stats: &stats })?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        self.history.push((step, stats.clone()));
        Ok(stats)
    }

    fn reset(&mut self) {
        self.stored.clear();
    }
}
