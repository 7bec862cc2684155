pub mod accumulator;
pub mod collection;
pub mod error;
pub mod group;
pub mod metadata;
pub mod metric;
pub mod nested;
pub mod options;
pub mod reduction;
pub mod state;
pub mod sync;
pub mod tensor;
pub mod value;

pub use accumulator::{Accumulator, AccumulatorKind};
pub use collection::{extract_batch_size, Batch, Entry, MetricCollection, MetricSource, Metrics};
pub use error::{MetricErr, Result};
pub use group::AccumulatorGroup;
pub use metadata::LogMetadata;
pub use metric::{shared, MetricHandle, StreamingMetric};
pub use nested::Nested;
pub use options::LogOptions;
pub use reduction::{ReduceFx, Reduction};
pub use state::{AccumulatorState, CollectionState};
pub use sync::{LocalProcessGroup, SyncFn, SyncPolicy};
pub use tensor::{Device, GradFn, Tensor};
pub use value::{Loggable, Value};
