use std::{error::Error, fmt};

/// The result type used across the metric collection.
pub type Result<T> = std::result::Result<T, MetricErr>;

/// Failures surfaced while logging, reading or configuring metrics.
#[derive(Debug)]
pub enum MetricErr {
    /// The reduction selector is not one of `min`, `max`, `mean` or `sum`.
    UnsupportedReduction { found: String },
    /// The same key was logged twice with different settings.
    ConflictingMetadata { fx: String, name: String },
    /// `minimize` was given something other than a tensor.
    MinimizeNotTensor { found: &'static str },
    /// An extra payload still holds a gradient-tracking reference.
    ExtraWithGraph { key: String, grad_fn: String },
    /// A logged value doesn't have the shape it was first registered with.
    StructureMismatch { key: String },
    /// A progress bar value couldn't be converted to a single number.
    NonScalarProgressBar { name: String, numel: usize },
    /// Tensor data doesn't fit the requested shape.
    InvalidShape { got: usize, expected: usize },
    /// A rank outside of its process group.
    InvalidRank { rank: usize, world_size: usize },
    /// A value couldn't be read from or written as JSON.
    Json(serde_json::Error),
}

impl fmt::Display for MetricErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricErr::UnsupportedReduction { found } => write!(
                f,
                "only `reduce_fx={{min,max,mean,sum}}` are supported, found: {found}"
            ),
            MetricErr::ConflictingMetadata { fx, name } => write!(
                f,
                "`{name}` was logged twice in `{fx}` with different arguments, this is not allowed"
            ),
            MetricErr::MinimizeNotTensor { found } => {
                write!(f, "`minimize` must be a tensor, found: {found}")
            }
            MetricErr::ExtraWithGraph { key, grad_fn } => write!(
                f,
                "extra value `{key}` is attached to a graph through `{grad_fn}`, detach it before returning it"
            ),
            MetricErr::StructureMismatch { key } => write!(
                f,
                "the value logged under `{key}` doesn't match the structure it was registered with"
            ),
            MetricErr::NonScalarProgressBar { name, numel } => write!(
                f,
                "the progress bar metric `{name}` has {numel} elements, expected a single one"
            ),
            MetricErr::InvalidShape { got, expected } => {
                write!(f, "invalid shape: got {got} elements, expected {expected}")
            }
            MetricErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of a group of {world_size} ranks")
            }
            MetricErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for MetricErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MetricErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MetricErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
