use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    metric::{MetricHandle, StreamingMetric},
    nested::Nested,
    tensor::Tensor,
};

/// A single quantity handed to [`crate::MetricCollection::log`].
#[derive(Clone)]
pub enum Loggable {
    /// A raw value, reduced by the collection.
    Tensor(Tensor),
    /// A metric that reduces itself.
    Metric(MetricHandle),
}

impl Loggable {
    pub fn is_tensor(&self) -> bool {
        matches!(self, Loggable::Tensor(_))
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Loggable::Tensor(t) => Some(t),
            Loggable::Metric(_) => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Loggable::Tensor(_) => "tensor",
            Loggable::Metric(_) => "metric",
        }
    }
}

impl fmt::Debug for Loggable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loggable::Tensor(t) => f.debug_tuple("Tensor").field(t).finish(),
            Loggable::Metric(m) => f.debug_tuple("Metric").field(&&*m.lock()).finish(),
        }
    }
}

/// A possibly nested value handed to [`crate::MetricCollection::log`].
pub type Value = Nested<Loggable>;

impl Value {
    /// A metric shared with the caller, logged as is.
    pub fn metric(handle: MetricHandle) -> Self {
        Nested::Leaf(Loggable::Metric(handle))
    }

    /// Builds a mapping value from `(name, value)` pairs.
    pub fn mapping<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Nested::Map(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

impl From<Tensor> for Value {
    fn from(value: Tensor) -> Self {
        Nested::Leaf(Loggable::Tensor(value))
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Tensor::from(value).into()
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Tensor::from(value).into()
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Tensor::from(value).into()
    }
}

impl<M> From<Arc<Mutex<M>>> for Value
where
    M: StreamingMetric + Send + 'static,
{
    fn from(value: Arc<Mutex<M>>) -> Self {
        Value::metric(value)
    }
}
