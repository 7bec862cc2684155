mod batch;
mod export;

use std::{collections::BTreeMap, fmt, sync::Arc};

use log::debug;

pub use batch::{extract_batch_size, Batch, MAX_BATCH_DEPTH};
pub use export::{MetricSource, Metrics};

use crate::{
    accumulator::Accumulator,
    error::{MetricErr, Result},
    group::AccumulatorGroup,
    metadata::LogMetadata,
    nested::Nested,
    options::LogOptions,
    state::CollectionState,
    tensor::{Device, Tensor},
    value::{Loggable, Value},
};

/// What a key of the collection holds.
pub enum Entry {
    /// A value logged on its own.
    Single(Accumulator),
    /// A value logged as a mapping.
    Group(AccumulatorGroup),
}

impl Entry {
    pub fn meta(&self) -> &Arc<LogMetadata> {
        match self {
            Entry::Single(acc) => acc.meta(),
            Entry::Group(group) => group.meta(),
        }
    }

    pub fn has_reset(&self) -> bool {
        match self {
            Entry::Single(acc) => acc.has_reset(),
            Entry::Group(group) => group.has_reset(),
        }
    }

    pub fn as_single(&self) -> Option<&Accumulator> {
        match self {
            Entry::Single(acc) => Some(acc),
            Entry::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&AccumulatorGroup> {
        match self {
            Entry::Single(_) => None,
            Entry::Group(group) => Some(group),
        }
    }

    fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Accumulator),
    {
        match self {
            Entry::Single(acc) => f(acc),
            Entry::Group(group) => group.for_each_mut(f),
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Single(acc) => write!(f, "{acc}"),
            Entry::Group(group) => write!(f, "{group}"),
        }
    }
}

/// Every value logged during a training, validation or test loop, keyed by call site and name.
///
/// ```
/// use metric_results::{Device, LogOptions, MetricCollection};
///
/// let mut results = MetricCollection::new(true, Device::Cpu);
/// results.log("training_step", "acc", 0.5, LogOptions::default().on_step(true)).unwrap();
///
/// let metrics = results.metrics(true).unwrap();
/// assert!(metrics.log().contains_key("acc_step"));
/// ```
pub struct MetricCollection {
    training: bool,
    device: Device,
    batch_size: Tensor,
    minimize: Option<Tensor>,
    extra: BTreeMap<String, Nested<Tensor>>,
    items: BTreeMap<String, Entry>,
}

impl MetricCollection {
    pub const DATALOADER_SUFFIX: &'static str = "/dataloader_idx_";

    /// Creates a new, empty `MetricCollection`.
    ///
    /// # Args
    /// * `training` - Whether values are logged from a training loop.
    /// * `device` - Where the collection's running state lives.
    pub fn new(training: bool, device: Device) -> Self {
        Self {
            training,
            device,
            batch_size: Tensor::scalar(1.0).to(device),
            minimize: None,
            extra: BTreeMap::new(),
            items: BTreeMap::new(),
        }
    }

    pub fn training(&self) -> bool {
        self.training
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// The weight given to raw values logged from now on.
    pub fn batch_size(&self) -> &Tensor {
        &self.batch_size
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = Tensor::scalar(batch_size as f32).to(self.device);
    }

    /// The loss returned by the training step.
    pub fn minimize(&self) -> Option<&Tensor> {
        self.minimize.as_ref()
    }

    /// Stores the loss returned by the training step.
    ///
    /// # Errors
    /// `MetricErr::MinimizeNotTensor` if `loss` is present but isn't a single tensor.
    pub fn set_minimize(&mut self, loss: Option<Value>) -> Result<()> {
        self.minimize = match loss {
            None => None,
            Some(Nested::Leaf(Loggable::Tensor(t))) => Some(t),
            Some(Nested::Leaf(other)) => {
                return Err(MetricErr::MinimizeNotTensor { found: other.kind() })
            }
            Some(Nested::Map(_)) => return Err(MetricErr::MinimizeNotTensor { found: "mapping" }),
        };
        Ok(())
    }

    /// Anything but the loss returned by the training step.
    pub fn extra(&self) -> &BTreeMap<String, Nested<Tensor>> {
        &self.extra
    }

    /// Stores the extras returned by the training step.
    ///
    /// The collection outlives the step, so extras must not keep graphs alive.
    ///
    /// # Errors
    /// `MetricErr::ExtraWithGraph` if any tensor of `extra` is still attached to a graph.
    pub fn set_extra(&mut self, extra: BTreeMap<String, Nested<Tensor>>) -> Result<()> {
        for (key, value) in &extra {
            if let Some(grad_fn) = value.leaves().into_iter().find_map(Tensor::grad_fn) {
                return Err(MetricErr::ExtraWithGraph {
                    key: key.clone(),
                    grad_fn: grad_fn.name().to_string(),
                });
            }
        }

        self.extra = extra;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.items.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Logs `value` under `name` from the call site `fx`.
    ///
    /// The first call for a key registers one accumulator per leaf of `value`, every call
    /// then feeds `value` into them.
    ///
    /// # Args
    /// * `fx` - The call site logging the value.
    /// * `name` - The name the value is exposed under.
    /// * `value` - A tensor, a streaming metric, or a mapping of them.
    /// * `opts` - How the value is reduced and exposed; `opts.batch_size` becomes the
    ///   collection's batch size when given.
    ///
    /// # Errors
    /// * `MetricErr::UnsupportedReduction` if `opts.reduce_fx` isn't supported.
    /// * `MetricErr::ConflictingMetadata` if the key was logged before with different options.
    /// * `MetricErr::StructureMismatch` if `value` doesn't have the shape it was registered with.
    pub fn log(
        &mut self,
        fx: &str,
        name: &str,
        value: impl Into<Value>,
        opts: LogOptions,
    ) -> Result<()> {
        let mut value = value.into();

        // no metrics should be logged with graphs
        let enable_graph = opts.enable_graph;
        value.for_each_mut(|leaf| {
            if let Loggable::Tensor(t) = leaf {
                if !enable_graph && t.requires_grad() {
                    *t = t.detach();
                }
                if t.device().requires_host_staging() {
                    t.to_mut(Device::Cpu);
                }
            }
        });

        let (key, fx) = match opts.dataloader_idx {
            Some(idx) => (format!("{fx}.{name}.{idx}"), format!("{fx}.{idx}")),
            None => (format!("{fx}.{name}"), fx.to_string()),
        };

        let meta = LogMetadata::new(&fx, name, &opts)?;
        match self.items.get(&key) {
            None => self.register_key(key.clone(), meta, &value),
            Some(entry) if **entry.meta() != meta => {
                return Err(MetricErr::ConflictingMetadata {
                    fx,
                    name: name.to_string(),
                });
            }
            Some(_) => {}
        }

        if let Some(batch_size) = opts.batch_size {
            self.set_batch_size(batch_size);
        }

        self.update_metrics(&key, &value)
    }

    /// Creates one accumulator per leaf of `value` under `key`.
    pub fn register_key(&mut self, key: String, meta: LogMetadata, value: &Value) {
        let meta = Arc::new(meta);
        let device = self.device;

        let entry = match value.map(|leaf| Accumulator::new(Arc::clone(&meta), leaf, device)) {
            Nested::Leaf(acc) => Entry::Single(acc),
            Nested::Map(items) => Entry::Group(AccumulatorGroup::new(meta, items)),
        };

        debug!("registered `{key}`");
        self.items.insert(key, entry);
    }

    /// Feeds `value` into the accumulators registered under `key`.
    ///
    /// A value that doesn't fit leaves every accumulator of `key` untouched.
    ///
    /// # Errors
    /// `MetricErr::StructureMismatch` if `key` isn't registered or `value` doesn't have its shape.
    pub fn update_metrics(&mut self, key: &str, value: &Value) -> Result<()> {
        let batch_size = self.batch_size.mean();
        let device = self.device;
        let mismatch = || MetricErr::StructureMismatch {
            key: key.to_string(),
        };

        match (self.items.get_mut(key).ok_or_else(mismatch)?, value) {
            (Entry::Single(acc), Nested::Leaf(leaf)) if acc.accepts(leaf) => {
                acc.forward(&on_device(leaf, device), batch_size)
            }
            (Entry::Group(group), value) if group.accepts(value) => {
                let mut result = Ok(());
                group.as_nested_mut().zip_apply(value, |acc, leaf| {
                    if result.is_ok() {
                        result = acc.forward(&on_device(leaf, device), batch_size);
                    }
                });
                result
            }
            _ => Err(mismatch()),
        }
    }

    /// The entries that hold values, skipping those reset since they were last updated.
    pub fn valid_items(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.items
            .iter()
            .filter(|(_, entry)| !entry.has_reset())
            .map(|(key, entry)| (key.as_str(), entry))
    }

    fn valid_items_mut(&mut self) -> impl Iterator<Item = (&str, &mut Entry)> {
        self.items
            .iter_mut()
            .filter(|(_, entry)| !entry.has_reset())
            .map(|(key, entry)| (key.as_str(), entry))
    }

    /// Resets accumulators.
    ///
    /// # Args
    /// * `metrics` - `Some(true)` resets only streaming metrics, `Some(false)` only raw
    ///   values and `None` both.
    /// * `fx` - Resets only the values logged from this call site, all of them when `None`.
    pub fn reset(&mut self, metrics: Option<bool>, fx: Option<&str>) {
        debug!("resetting metrics={metrics:?} fx={fx:?}");

        for entry in self.items.values_mut() {
            entry.for_each_mut(|acc| {
                let requested_kind = metrics.map_or(true, |metrics| metrics != acc.is_tensor());
                let same_fx = fx.map_or(true, |fx| fx == acc.meta().fx());
                if requested_kind && same_fx {
                    acc.reset();
                }
            });
        }
    }

    /// Sets the batch size from the amount of samples found in `batch`.
    ///
    /// # Returns
    /// The batch size found, 1 when it couldn't be determined.
    pub fn extract_batch_size(&mut self, batch: &Batch) -> usize {
        let batch_size = extract_batch_size(batch);
        self.set_batch_size(batch_size);
        batch_size
    }

    /// Moves every value held by the collection to `device`.
    pub fn to(&mut self, device: Device) -> &mut Self {
        debug!("moving collection from {} to {device}", self.device);

        for entry in self.items.values_mut() {
            entry.for_each_mut(|acc| acc.to(device));
        }
        if let Some(minimize) = &mut self.minimize {
            minimize.to_mut(device);
        }
        for value in self.extra.values_mut() {
            value.for_each_mut(|t| t.to_mut(device));
        }
        self.batch_size.to_mut(device);
        self.device = device;
        self
    }

    /// Moves every value held by the collection to the cpu.
    pub fn cpu(&mut self) -> &mut Self {
        self.to(Device::Cpu)
    }

    /// A detached snapshot of the collection.
    pub fn state(&self) -> CollectionState {
        let items = self
            .items
            .iter()
            .map(|(key, entry)| {
                let state = match entry {
                    Entry::Single(acc) => Nested::Leaf(acc.state()),
                    Entry::Group(group) => Nested::Map(
                        group
                            .iter()
                            .map(|(name, item)| (name.clone(), item.map(Accumulator::state)))
                            .collect(),
                    ),
                };
                (key.clone(), state)
            })
            .collect();

        CollectionState {
            training: self.training,
            device: self.device,
            batch_size: self.batch_size.clone(),
            minimize: self.minimize.as_ref().map(Tensor::detach),
            extra: self.extra.clone(),
            items,
        }
    }
}

fn on_device(leaf: &Loggable, device: Device) -> Loggable {
    match leaf {
        Loggable::Tensor(t) => Loggable::Tensor(t.clone().to(device)),
        other => other.clone(),
    }
}

impl fmt::Display for MetricCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetricCollection({}, {}, {{", self.training, self.device)?;
        for (i, (key, entry)) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "'{key}': {entry}")?;
        }
        write!(f, "}})")
    }
}

#[cfg(test)]
mod test;
