use std::{collections::BTreeMap, fmt};

use serde::Serialize;

use super::{Entry, MetricCollection};
use crate::{
    accumulator::Accumulator,
    error::{MetricErr, Result},
    metadata::LogMetadata,
    nested::Nested,
    tensor::Tensor,
};

/// Who a metric is exposed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    Callback,
    Pbar,
    Log,
}

impl MetricSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricSource::Callback => "callback",
            MetricSource::Pbar => "pbar",
            MetricSource::Log => "log",
        }
    }
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The values read from a collection, split by who they are exposed to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    callback: BTreeMap<String, Nested<Tensor>>,
    #[serde(rename = "pbar")]
    progress_bar: BTreeMap<String, Nested<f32>>,
    log: BTreeMap<String, Nested<Tensor>>,
}

impl Metrics {
    /// Values visible to callbacks, under both their plain and forked names.
    pub fn callback(&self) -> &BTreeMap<String, Nested<Tensor>> {
        &self.callback
    }

    /// Values shown in the progress bar, as plain numbers.
    pub fn progress_bar(&self) -> &BTreeMap<String, Nested<f32>> {
        &self.progress_bar
    }

    /// Values sent to the logger.
    pub fn log(&self) -> &BTreeMap<String, Nested<Tensor>> {
        &self.log
    }

    /// The names exposed to `source`, in order.
    pub fn names(&self, source: MetricSource) -> Vec<&str> {
        match source {
            MetricSource::Callback => self.callback.keys().map(String::as_str).collect(),
            MetricSource::Pbar => self.progress_bar.keys().map(String::as_str).collect(),
            MetricSource::Log => self.log.keys().map(String::as_str).collect(),
        }
    }

    /// The number exposed to `source` under `name`, if it is a single value.
    pub fn scalar(&self, source: MetricSource, name: &str) -> Option<f32> {
        match source {
            MetricSource::Callback => self.callback.get(name)?.as_leaf()?.item(),
            MetricSource::Pbar => self.progress_bar.get(name)?.as_leaf().copied(),
            MetricSource::Log => self.log.get(name)?.as_leaf()?.item(),
        }
    }

    /// Serializes the three buckets as a JSON object keyed by source.
    ///
    /// # Errors
    /// `MetricErr::Json` if a value can't be represented as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl MetricCollection {
    /// Reads the current value of every entry and sorts them by who they are exposed to.
    ///
    /// # Args
    /// * `on_step` - Reads the value of the last step when `true`, the reduction of the
    ///   epoch so far when `false`.
    ///
    /// # Errors
    /// `MetricErr::NonScalarProgressBar` if a progress bar value has more than one element.
    pub fn metrics(&mut self, on_step: bool) -> Result<Metrics> {
        let training = self.training;
        let mut metrics = Metrics::default();

        for (_, entry) in self.valid_items_mut() {
            let value = match entry {
                Entry::Single(acc) => cache(acc, on_step).map(Nested::Leaf),
                Entry::Group(group) => Some(group.as_nested_mut().filter_map(|acc| cache(acc, on_step))),
            };

            // an entry without any value left has nothing to expose
            let Some(value) = value.filter(Nested::has_leaves) else {
                continue;
            };

            let meta = entry.meta();
            let (name, forked_name) = forked_names(meta, on_step);

            if meta.logger() {
                metrics.log.insert(forked_name.clone(), value.clone());
            }

            // callbacks only see `_step` values while training
            if training || (meta.on_epoch() && !on_step) {
                metrics.callback.insert(name, value.clone());
                metrics.callback.insert(forked_name.clone(), value.clone());
            }

            if meta.prog_bar() {
                let scalars = value.try_map(|t| {
                    t.item().ok_or_else(|| MetricErr::NonScalarProgressBar {
                        name: forked_name.clone(),
                        numel: t.numel(),
                    })
                })?;
                metrics.progress_bar.insert(forked_name, scalars);
            }
        }

        Ok(metrics)
    }
}

/// The value an accumulator exposes for a step or an epoch read, if any.
fn cache(acc: &mut Accumulator, on_step: bool) -> Option<Tensor> {
    let meta = acc.meta();
    let (on_step_meta, on_epoch_meta, enable_graph) = (meta.on_step(), meta.on_epoch(), meta.enable_graph());

    let cache = if on_step && on_step_meta {
        acc.forward_cache().cloned()
    } else if !on_step && on_epoch_meta {
        Some(acc.compute())
    } else {
        None
    };

    if enable_graph {
        cache
    } else {
        cache.map(|t| t.detach())
    }
}

/// The plain and forked names of an entry, both suffixed with its dataloader index.
fn forked_names(meta: &LogMetadata, on_step: bool) -> (String, String) {
    let mut name = meta.name().to_string();
    let mut forked_name = meta.forked_name(on_step);

    if let Some(idx) = meta.dataloader_idx() {
        let suffix = format!("{}{idx}", MetricCollection::DATALOADER_SUFFIX);
        name.push_str(&suffix);
        forked_name.push_str(&suffix);
    }

    (name, forked_name)
}
