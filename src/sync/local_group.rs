use std::{
    num::NonZeroUsize,
    sync::{Arc, Barrier},
};

use log::trace;
use parking_lot::Mutex;

use super::SyncFn;
use crate::{
    error::{MetricErr, Result},
    reduction::Reduction,
    tensor::Tensor,
};

/// The slots and barrier every rank of a group meets at.
struct Collective {
    world_size: usize,
    slots: Mutex<Vec<Option<Tensor>>>,
    barrier: Barrier,
}

impl Collective {
    fn all_reduce(&self, rank: usize, value: &Tensor, op: Reduction) -> Tensor {
        self.slots.lock()[rank] = Some(value.clone());
        self.barrier.wait();

        let reduced = {
            let slots = self.slots.lock();
            let mut contributions = slots.iter().flatten();

            let mut data = match contributions.next() {
                Some(first) => first.data().clone(),
                None => value.data().clone(),
            };
            for other in contributions {
                data.zip_mut_with(other.data(), |a, b| *a = op.combine(*a, *b));
            }
            if op == Reduction::Mean {
                let world_size = self.world_size as f32;
                data.mapv_inplace(|v| v / world_size);
            }

            Tensor::from_array(data).to(value.device())
        };

        trace!("rank {rank} reduced a value with {op}");
        self.barrier.wait();
        reduced
    }
}

/// An all-reduce collective shared by `world_size` threads of the same process.
///
/// Each rank deposits its value, waits until every rank did, reduces all of them and
/// waits once more before the slots can be reused by the next call.
pub struct LocalProcessGroup {
    collective: Arc<Collective>,
    sync_fns: Vec<SyncFn>,
}

impl LocalProcessGroup {
    /// Creates a new `LocalProcessGroup`.
    ///
    /// # Args
    /// * `world_size` - The amount of ranks taking part in every collective call.
    ///
    /// # Returns
    /// A shared handle to the group.
    pub fn new(world_size: NonZeroUsize) -> Arc<Self> {
        let world_size = world_size.get();
        let collective = Arc::new(Collective {
            world_size,
            slots: Mutex::new(vec![None; world_size]),
            barrier: Barrier::new(world_size),
        });

        let sync_fns = (0..world_size)
            .map(|rank| {
                let collective = Arc::clone(&collective);
                Arc::new(move |value: &Tensor, op: Reduction, _group: Option<&str>| {
                    collective.all_reduce(rank, value, op)
                }) as SyncFn
            })
            .collect();

        Arc::new(Self {
            collective,
            sync_fns,
        })
    }

    pub fn world_size(&self) -> usize {
        self.collective.world_size
    }

    /// Reduces `value` with the values of every other rank.
    ///
    /// Blocks until all ranks called it. Every rank must contribute a tensor of the same shape.
    ///
    /// # Args
    /// * `rank` - The caller's rank, in `0..world_size`.
    /// * `value` - This rank's contribution.
    /// * `op` - How contributions are combined, `mean` sums and divides by the world size.
    ///
    /// # Returns
    /// The reduced tensor, identical on every rank.
    ///
    /// # Panics
    /// If `rank` is not lower than the world size.
    pub fn all_reduce(&self, rank: usize, value: &Tensor, op: Reduction) -> Tensor {
        self.collective.all_reduce(rank, value, op)
    }

    /// The collective seen from `rank`, ready to be injected into a [`super::SyncPolicy`].
    ///
    /// Every call for the same rank hands back the same function, so options built at
    /// each step keep comparing equal.
    ///
    /// # Errors
    /// `MetricErr::InvalidRank` if `rank` is not lower than the world size.
    pub fn sync_fn(&self, rank: usize) -> Result<SyncFn> {
        self.sync_fns
            .get(rank)
            .cloned()
            .ok_or(MetricErr::InvalidRank {
                rank,
                world_size: self.world_size(),
            })
    }
}
