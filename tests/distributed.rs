use std::{num::NonZeroUsize, sync::Arc, thread};

use metric_results::{
    Device, Entry, LocalProcessGroup, LogOptions, MetricCollection, MetricSource, Reduction, Tensor,
};

const WORLD_SIZE: usize = 2;

/// Runs `f` once per rank on its own thread and collects what each rank returned.
fn spawn_ranks<F, T>(f: F) -> Vec<T>
where
    F: Fn(usize, Arc<LocalProcessGroup>) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let group = LocalProcessGroup::new(NonZeroUsize::new(WORLD_SIZE).unwrap());
    let f = Arc::new(f);

    let handles: Vec<_> = (0..WORLD_SIZE)
        .map(|rank| {
            let group = Arc::clone(&group);
            let f = Arc::clone(&f);
            thread::spawn(move || f(rank, group))
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn synced(group: &Arc<LocalProcessGroup>, rank: usize, reduction: Reduction) -> LogOptions {
    LogOptions::default()
        .reduce_fx(reduction)
        .sync_dist(group.sync_fn(rank).unwrap(), Some("world".to_string()))
}

#[test]
fn epoch_values_are_reduced_across_ranks() {
    let _ = env_logger::builder().is_test(true).try_init();

    let per_rank = spawn_ranks(|rank, group| {
        let mut results = MetricCollection::new(true, Device::Cpu);
        let steps: &[(f32, usize)] = match rank {
            0 => &[(1.0, 1), (3.0, 1)],
            _ => &[(10.0, 2), (10.0, 2)],
        };

        for &(value, batch_size) in steps {
            for (name, reduction) in [
                ("max", Reduction::Max),
                ("mean", Reduction::Mean),
                ("sum", Reduction::Sum),
            ] {
                let opts = synced(&group, rank, reduction).batch_size(batch_size);
                results.log("training_step", name, value, opts).unwrap();
            }
        }

        let metrics = results.metrics(false).unwrap();
        ["max", "mean", "sum"].map(|name| metrics.scalar(MetricSource::Log, name).unwrap())
    });

    // rank 0 contributes 4 over 2 samples, rank 1 contributes 40 over 4 samples
    for [max, mean, sum] in per_rank {
        assert_eq!(max, 10.0);
        assert_eq!(mean, 44.0 / 6.0);
        assert_eq!(sum, 44.0);
    }
}

#[test]
fn step_only_values_are_synchronized_when_logged() {
    let per_rank = spawn_ranks(|rank, group| {
        let mut results = MetricCollection::new(true, Device::Cpu);
        let opts = synced(&group, rank, Reduction::Sum)
            .on_step(true)
            .on_epoch(false);
        results
            .log("training_step", "loss", rank as f32 + 1.0, opts)
            .unwrap();

        let acc = results
            .get("training_step.loss")
            .and_then(Entry::as_single)
            .unwrap();
        let running = acc.value().cloned().unwrap();
        let step = results
            .metrics(true)
            .unwrap()
            .scalar(MetricSource::Log, "loss")
            .unwrap();
        (running, step)
    });

    for (rank, (running, step)) in per_rank.into_iter().enumerate() {
        assert_eq!(running, Tensor::scalar(3.0));
        assert_eq!(step, rank as f32 + 1.0);
    }
}

#[test]
fn values_stay_local_without_sync() {
    let per_rank = spawn_ranks(|rank, _group| {
        let mut results = MetricCollection::new(true, Device::Cpu);
        let opts = LogOptions::default().reduce_fx("sum");
        results
            .log("training_step", "loss", rank as f32 * 5.0, opts)
            .unwrap();

        results
            .metrics(false)
            .unwrap()
            .scalar(MetricSource::Log, "loss")
            .unwrap()
    });

    assert_eq!(per_rank, [0.0, 5.0]);
}
