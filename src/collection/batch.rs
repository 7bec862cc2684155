use std::{cell::RefCell, rc::Rc};

use log::debug;

use crate::tensor::Tensor;

/// How deep [`extract_batch_size`] follows nested batches before giving up.
pub const MAX_BATCH_DEPTH: usize = 256;

/// A loosely structured batch, as handed to a training step.
#[derive(Debug, Clone)]
pub enum Batch {
    Tensor(Tensor),
    Str(String),
    /// Named fields, in insertion order.
    Map(Vec<(String, Batch)>),
    Seq(Vec<Batch>),
    /// A batch shared with other parts of the structure, possibly with itself.
    Shared(Rc<RefCell<Batch>>),
    Other,
}

/// Estimates the amount of samples in `batch` by following its first element down to a leaf.
///
/// Tensors count their leading dimension, strings their length and anything else a single
/// sample. Structures nested deeper than [`MAX_BATCH_DEPTH`] (self-referential ones
/// included) count as a single sample too.
pub fn extract_batch_size(batch: &Batch) -> usize {
    match extract(batch, 0) {
        Some(size) => size,
        None => {
            debug!("batch is nested deeper than {MAX_BATCH_DEPTH} levels, using a batch size of 1");
            1
        }
    }
}

fn extract(batch: &Batch, depth: usize) -> Option<usize> {
    if depth > MAX_BATCH_DEPTH {
        return None;
    }

    match batch {
        Batch::Tensor(t) => Some(t.leading_dim()),
        Batch::Str(s) => Some(s.chars().count()),
        Batch::Map(fields) => match fields.first() {
            Some((_, sample)) => extract(sample, depth + 1),
            None => Some(1),
        },
        Batch::Seq(items) => match items.first() {
            Some(sample) => extract(sample, depth + 1),
            None => Some(1),
        },
        Batch::Shared(inner) => extract(&inner.borrow(), depth + 1),
        Batch::Other => Some(1),
    }
}

impl From<Tensor> for Batch {
    fn from(value: Tensor) -> Self {
        Batch::Tensor(value)
    }
}

impl From<&str> for Batch {
    fn from(value: &str) -> Self {
        Batch::Str(value.to_string())
    }
}

impl From<String> for Batch {
    fn from(value: String) -> Self {
        Batch::Str(value)
    }
}

impl From<Vec<Batch>> for Batch {
    fn from(value: Vec<Batch>) -> Self {
        Batch::Seq(value)
    }
}
