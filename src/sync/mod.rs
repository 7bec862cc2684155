mod local_group;
mod policy;

pub use local_group::LocalProcessGroup;
pub use policy::{SyncFn, SyncPolicy};
