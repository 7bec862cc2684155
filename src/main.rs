use std::{env, fs, num::NonZeroUsize, thread};

use anyhow::Context;
use log::info;

use metric_results::{Batch, Device, LocalProcessGroup, LogOptions, MetricCollection, Tensor, Value};

const EPOCHS: usize = 3;
const STEPS: usize = 4;
const WORLD_SIZE: usize = 2;

/// Runs a small synthetic training loop on `WORLD_SIZE` ranks and prints what each
/// epoch exposes.
///
/// The options used for the loss can be read from a JSON file given as the first argument.
fn main() -> anyhow::Result<()> {
    env_logger::init();

    let loss_opts = match env::args().nth(1) {
        Some(path) => {
            let json = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            LogOptions::from_json(&json).with_context(|| format!("parsing {path}"))?
        }
        None => LogOptions::default().on_step(true).prog_bar(true),
    };

    let group = LocalProcessGroup::new(NonZeroUsize::new(WORLD_SIZE).context("empty world")?);
    let mut handles = Vec::with_capacity(WORLD_SIZE);
    for rank in 0..WORLD_SIZE {
        let opts = loss_opts
            .clone()
            .sync_dist(group.sync_fn(rank)?, Some("world".to_string()));
        handles.push(thread::spawn(move || run(rank, opts)));
    }

    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("a rank panicked"),
        }
    }

    Ok(())
}

fn run(rank: usize, loss_opts: LogOptions) -> anyhow::Result<()> {
    let mut results = MetricCollection::new(true, Device::Cpu);

    for epoch in 0..EPOCHS {
        for step in 0..STEPS {
            let samples = (rank + 1) * 8;
            let batch = Batch::Seq(vec![Tensor::from_slice(&vec![0.0; samples]).into()]);
            results.extract_batch_size(&batch);

            let loss = 1.0 / (1.0 + (epoch * STEPS + step) as f32) + rank as f32 * 0.1;
            results.log("training_step", "loss", loss, loss_opts.clone())?;
            results.log(
                "training_step",
                "grads",
                Value::mapping([("norm", loss * 2.0), ("max", loss * 4.0)]),
                LogOptions::default().reduce_fx("max"),
            )?;

            let metrics = results.metrics(true)?;
            if rank == 0 {
                info!("epoch {epoch} step {step}: {:?}", metrics.progress_bar());
            }
        }

        let metrics = results.metrics(false)?;
        if rank == 0 {
            println!("{}", metrics.to_json()?);
        }
        results.reset(None, None);
    }

    Ok(())
}
