use std::{fmt, sync::Arc};

use log::warn;

use crate::{
    error::{MetricErr, Result},
    metadata::LogMetadata,
    metric::MetricHandle,
    reduction::Reduction,
    state::AccumulatorState,
    tensor::{Device, Tensor},
    value::Loggable,
};

/// Whether an accumulator reduces raw values itself or delegates to a streaming metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulatorKind {
    Raw,
    Delegated,
}

enum State {
    Raw {
        value: Tensor,
        cumulated_batch_size: Option<Tensor>,
    },
    Delegated(MetricHandle),
}

/// Accumulates the values logged under one key across the steps of an epoch.
pub struct Accumulator {
    meta: Arc<LogMetadata>,
    state: State,
    forward_cache: Option<Tensor>,
    computed: Option<Tensor>,
    has_reset: bool,
    update_called: bool,
}

impl Accumulator {
    /// Creates a new `Accumulator` for the first value logged under a key.
    ///
    /// # Args
    /// * `meta` - The metadata shared by every leaf of the logged value.
    /// * `leaf` - The first value, decides the accumulator's kind.
    /// * `device` - Where raw running state is placed.
    pub fn new(meta: Arc<LogMetadata>, leaf: &Loggable, device: Device) -> Self {
        let state = match leaf {
            Loggable::Tensor(_) => State::Raw {
                value: Tensor::scalar(meta.reduction().identity()).to(device),
                cumulated_batch_size: meta
                    .is_mean_reduction()
                    .then(|| Tensor::scalar(0.0).to(device)),
            },
            Loggable::Metric(handle) => State::Delegated(Arc::clone(handle)),
        };

        Self {
            meta,
            state,
            forward_cache: None,
            computed: None,
            has_reset: false,
            update_called: false,
        }
    }

    pub fn meta(&self) -> &Arc<LogMetadata> {
        &self.meta
    }

    pub fn kind(&self) -> AccumulatorKind {
        match self.state {
            State::Raw { .. } => AccumulatorKind::Raw,
            State::Delegated(_) => AccumulatorKind::Delegated,
        }
    }

    pub fn is_tensor(&self) -> bool {
        self.kind() == AccumulatorKind::Raw
    }

    pub fn has_reset(&self) -> bool {
        self.has_reset
    }

    /// The running value of a raw accumulator.
    pub fn value(&self) -> Option<&Tensor> {
        match &self.state {
            State::Raw { value, .. } => Some(value),
            State::Delegated(_) => None,
        }
    }

    /// Whether the running state matches the kind of `leaf`.
    pub fn accepts(&self, leaf: &Loggable) -> bool {
        matches!(
            (&self.state, leaf),
            (State::Raw { .. }, Loggable::Tensor(_)) | (State::Delegated(_), Loggable::Metric(_))
        )
    }

    /// The weight accumulated so far by a raw accumulator reducing with `mean`.
    pub fn cumulated_batch_size(&self) -> Option<&Tensor> {
        match &self.state {
            State::Raw {
                cumulated_batch_size,
                ..
            } => cumulated_batch_size.as_ref(),
            State::Delegated(_) => None,
        }
    }

    /// The value of the most recent update.
    pub fn forward_cache(&self) -> Option<&Tensor> {
        self.forward_cache.as_ref()
    }

    /// The memoized result of [`Accumulator::compute`], if still valid.
    pub fn computed(&self) -> Option<&Tensor> {
        self.computed.as_ref()
    }

    /// Feeds one logged value into the running state.
    ///
    /// # Args
    /// * `value` - The logged value, of the same kind the accumulator was created with.
    /// * `batch_size` - The weight of this value in `mean` and `sum` reductions.
    ///
    /// # Errors
    /// `MetricErr::StructureMismatch` if a tensor is logged where a metric was, or the opposite.
    pub fn update(&mut self, value: &Loggable, batch_size: f32) -> Result<()> {
        match (&mut self.state, value) {
            (
                State::Raw {
                    value: running,
                    cumulated_batch_size,
                },
                Loggable::Tensor(value),
            ) => {
                self.forward_cache = Some(value.clone());

                if self.meta.step_only() {
                    *running = self.meta.sync().apply(value);
                } else {
                    let contribution = value.mean();
                    let current = running.mean();
                    let next = match self.meta.reduction() {
                        Reduction::Mean => {
                            if let Some(cumulated) = cumulated_batch_size {
                                *cumulated = cumulated.scalar_like(cumulated.mean() + batch_size);
                            }
                            current + contribution * batch_size
                        }
                        Reduction::Sum => current + contribution * batch_size,
                        reduction @ (Reduction::Min | Reduction::Max) => {
                            reduction.combine(current, contribution)
                        }
                    };
                    *running = running.scalar_like(next);
                }
            }
            (State::Delegated(handle), Loggable::Metric(metric)) => {
                *handle = Arc::clone(metric);
                self.forward_cache = handle.lock().forward_cache();
            }
            _ => {
                return Err(MetricErr::StructureMismatch {
                    key: format!("{}.{}", self.meta.fx(), self.meta.name()),
                });
            }
        }

        self.computed = None;
        self.update_called = true;
        Ok(())
    }

    /// Updates with `value`, keeping it attached to its graph only when graph retention was asked for.
    pub fn forward(&mut self, value: &Loggable, batch_size: f32) -> Result<()> {
        if self.meta.enable_graph() {
            self.update(value, batch_size)?;
        } else {
            let detached = match value {
                Loggable::Tensor(t) if t.requires_grad() => Loggable::Tensor(t.detach()),
                other => other.clone(),
            };
            self.update(&detached, batch_size)?;
        }

        self.has_reset = false;
        Ok(())
    }

    /// Reduces everything accumulated since the last reset, memoizing the result.
    ///
    /// Raw values are synchronized across processes here and only here.
    pub fn compute(&mut self) -> Tensor {
        if let Some(computed) = &self.computed {
            return computed.clone();
        }

        if !self.update_called {
            warn!(
                "`compute` was called on `{}` before any `update`, its state hasn't been updated yet",
                self.meta.name()
            );
        }

        let computed = match &self.state {
            State::Raw {
                value,
                cumulated_batch_size,
            } => {
                let value = self.meta.sync().apply(value);
                match cumulated_batch_size {
                    Some(cumulated) if self.meta.is_mean_reduction() => {
                        let cumulated = self.meta.sync().apply(cumulated).mean();
                        value.mapv(|v| v / cumulated)
                    }
                    _ => value,
                }
            }
            State::Delegated(handle) => handle.lock().compute(),
        };

        self.computed = Some(computed.clone());
        computed
    }

    /// Clears the running state back to the reduction's identity.
    pub fn reset(&mut self) {
        match &mut self.state {
            State::Raw {
                value,
                cumulated_batch_size,
            } => {
                *value = value.scalar_like(self.meta.reduction().identity());
                if let Some(cumulated) = cumulated_batch_size {
                    *cumulated = cumulated.scalar_like(0.0);
                }
            }
            State::Delegated(handle) => handle.lock().reset(),
        }

        self.forward_cache = None;
        self.computed = None;
        self.update_called = false;
        self.has_reset = true;
    }

    /// Moves every tensor held by this accumulator to `device`.
    pub fn to(&mut self, device: Device) {
        match &mut self.state {
            State::Raw {
                value,
                cumulated_batch_size,
            } => {
                value.to_mut(device);
                if let Some(cumulated) = cumulated_batch_size {
                    cumulated.to_mut(device);
                }
            }
            State::Delegated(handle) => handle.lock().to_device(device),
        }

        for cache in [&mut self.forward_cache, &mut self.computed].into_iter().flatten() {
            cache.to_mut(device);
        }
    }

    pub(crate) fn state(&self) -> AccumulatorState {
        let (value, cumulated_batch_size) = match &self.state {
            State::Raw {
                value,
                cumulated_batch_size,
            } => (Some(value.detach()), cumulated_batch_size.clone()),
            State::Delegated(_) => (None, None),
        };

        AccumulatorState {
            kind: self.kind(),
            value,
            cumulated_batch_size,
            forward_cache: self.forward_cache.as_ref().map(Tensor::detach),
            computed: self.computed.as_ref().map(Tensor::detach),
            has_reset: self.has_reset,
        }
    }
}

impl fmt::Display for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Raw {
                value,
                cumulated_batch_size,
            } => {
                write!(f, "Accumulator(value={value}")?;
                if let Some(cumulated) = cumulated_batch_size {
                    write!(f, ", cumulated_batch_size={cumulated}")?;
                }
                write!(f, ")")
            }
            State::Delegated(handle) => write!(f, "Accumulator(value={:?})", &*handle.lock()),
        }
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
