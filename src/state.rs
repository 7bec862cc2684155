use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    accumulator::AccumulatorKind,
    nested::Nested,
    tensor::{Device, Tensor},
};

/// Snapshot of a single accumulator. Tensors are detached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatorState {
    pub kind: AccumulatorKind,
    pub value: Option<Tensor>,
    pub cumulated_batch_size: Option<Tensor>,
    pub forward_cache: Option<Tensor>,
    pub computed: Option<Tensor>,
    pub has_reset: bool,
}

/// Snapshot of a whole collection, safe to copy and serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionState {
    pub training: bool,
    pub device: Device,
    pub batch_size: Tensor,
    pub minimize: Option<Tensor>,
    pub extra: BTreeMap<String, Nested<Tensor>>,
    pub items: BTreeMap<String, Nested<AccumulatorState>>,
}

impl CollectionState {
    /// Serializes the snapshot as JSON.
    ///
    /// # Errors
    /// `MetricErr::Json` if a value can't be represented as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
