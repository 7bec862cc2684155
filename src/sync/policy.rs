use std::{fmt, sync::Arc};

use crate::{reduction::Reduction, tensor::Tensor};

/// A collective reduction across processes: `(value, op, group) -> reduced value`.
///
/// Every participating process must call it for the same key in the same order,
/// otherwise the group blocks forever.
pub type SyncFn = Arc<dyn Fn(&Tensor, Reduction, Option<&str>) -> Tensor + Send + Sync>;

/// Decides whether a value is reduced across processes before it is read.
#[derive(Clone, Default)]
pub struct SyncPolicy {
    should: bool,
    reduce_fn: Option<SyncFn>,
    op: Reduction,
    group: Option<String>,
}

impl SyncPolicy {
    /// Creates a new `SyncPolicy`.
    ///
    /// # Args
    /// * `should` - Whether values are synchronized at all.
    /// * `reduce_fn` - The collective to call, a missing one behaves as a no-op.
    /// * `group` - The process group handed to `reduce_fn`.
    ///
    /// # Returns
    /// A policy reducing with `mean` until [`SyncPolicy::with_op`] says otherwise.
    pub fn new(should: bool, reduce_fn: Option<SyncFn>, group: Option<String>) -> Self {
        Self {
            should,
            reduce_fn,
            op: Reduction::Mean,
            group,
        }
    }

    /// A policy that never synchronizes.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn with_op(mut self, op: Reduction) -> Self {
        self.op = op;
        self
    }

    pub fn should(&self) -> bool {
        self.should
    }

    pub fn op(&self) -> Reduction {
        self.op
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Reduces `value` across processes when enabled, otherwise hands back a copy of it.
    pub fn apply(&self, value: &Tensor) -> Tensor {
        match (&self.reduce_fn, self.should) {
            (Some(reduce_fn), true) => reduce_fn(value, self.op, self.group.as_deref()),
            _ => value.clone(),
        }
    }
}

impl PartialEq for SyncPolicy {
    fn eq(&self, other: &Self) -> bool {
        let same_fn = match (&self.reduce_fn, &other.reduce_fn) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };

        same_fn && self.should == other.should && self.op == other.op && self.group == other.group
    }
}

impl fmt::Debug for SyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPolicy")
            .field("should", &self.should)
            .field("reduce_fn", &self.reduce_fn.as_ref().map(|_| ".."))
            .field("op", &self.op)
            .field("group", &self.group)
            .finish()
    }
}
