use std::sync::Arc;

use parking_lot::Mutex;

use crate::tensor::{Device, Tensor};

/// A streaming metric that accumulates its own state.
///
/// Callers feed it through their own `update` before logging it; the collection only
/// reads, resets and relocates it.
pub trait StreamingMetric: std::fmt::Debug {
    /// The reduction of everything seen since the last reset.
    fn compute(&mut self) -> Tensor;

    /// Brings the state back to its defaults.
    fn reset(&mut self);

    /// Moves the state to `device`.
    fn to_device(&mut self, device: Device);

    /// The value produced by the most recent update, if any.
    fn forward_cache(&self) -> Option<Tensor>;
}

/// A streaming metric shared between the caller and the collection.
pub type MetricHandle = Arc<Mutex<dyn StreamingMetric + Send>>;

/// Wraps `metric` so it can be logged while the caller keeps updating it.
pub fn shared<M>(metric: M) -> Arc<Mutex<M>>
where
    M: StreamingMetric + Send + 'static,
{
    Arc::new(Mutex::new(metric))
}
