use std::collections::BTreeMap;

use super::*;
use crate::{
    accumulator::AccumulatorKind,
    metric::{self, StreamingMetric},
    reduction::Reduction,
};

#[derive(Debug, Default)]
struct Total {
    sum: f32,
    last: Option<f32>,
}

impl Total {
    fn update(&mut self, x: f32) {
        self.sum += x;
        self.last = Some(x);
    }
}

impl StreamingMetric for Total {
    fn compute(&mut self) -> Tensor {
        Tensor::scalar(self.sum)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn to_device(&mut self, _device: Device) {}

    fn forward_cache(&self) -> Option<Tensor> {
        self.last.map(Tensor::scalar)
    }
}

fn both() -> LogOptions {
    LogOptions::default().on_step(true).on_epoch(true)
}

#[test]
fn test_keys_are_namespaced_by_call_site() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.log("training_step", "loss", 1.0, both()).unwrap();
    results.log("validation_step", "loss", 2.0, both()).unwrap();

    let keys: Vec<_> = results.keys().collect();
    assert_eq!(keys, ["training_step.loss", "validation_step.loss"]);
    assert_eq!(results.len(), 2);
}

#[test]
fn test_relogging_with_other_flags_fails() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.log("training_step", "loss", 1.0, both()).unwrap();

    let err = results
        .log("training_step", "loss", 1.0, both().on_step(false))
        .unwrap_err();
    assert!(matches!(err, MetricErr::ConflictingMetadata { .. }));

    results.log("training_step", "loss", 3.0, both()).unwrap();
    let Some(Entry::Single(acc)) = results.get("training_step.loss") else {
        panic!("expected a single accumulator");
    };
    assert_eq!(acc.value(), Some(&Tensor::scalar(4.0)));
}

#[test]
fn test_unsupported_reduction_is_rejected() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let err = results
        .log("training_step", "loss", 1.0, both().reduce_fx("median"))
        .unwrap_err();

    assert!(matches!(err, MetricErr::UnsupportedReduction { .. }));
    assert!(results.is_empty());
}

#[test]
fn test_dataloader_idx_suffixes_key_and_call_site() {
    let mut results = MetricCollection::new(false, Device::Cpu);
    results
        .log("validation_step", "acc", 0.5, LogOptions::default().dataloader_idx(1))
        .unwrap();

    let entry = results.get("validation_step.acc.1").unwrap();
    assert_eq!(entry.meta().fx(), "validation_step.1");

    results.reset(None, Some("validation_step.1"));
    assert!(entry_has_reset(&results, "validation_step.acc.1"));
}

fn entry_has_reset(results: &MetricCollection, key: &str) -> bool {
    results.get(key).is_some_and(Entry::has_reset)
}

#[test]
fn test_batch_size_weights_later_updates() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.log("training_step", "loss", 1.0, both()).unwrap();
    results
        .log("training_step", "loss", 4.0, both().batch_size(3))
        .unwrap();

    assert_eq!(results.batch_size(), &Tensor::scalar(3.0));
    let metrics = results.metrics(false).unwrap();
    assert_eq!(
        metrics.scalar(MetricSource::Log, "loss_epoch"),
        Some((1.0 + 4.0 * 3.0) / 4.0)
    );
}

#[test]
fn test_mapping_values_become_groups() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let value = || Value::mapping([("precision", 0.5), ("recall", 0.25)]);

    results.log("training_step", "scores", value(), both()).unwrap();
    results.log("training_step", "scores", value(), both()).unwrap();

    let group = results.get("training_step.scores").and_then(Entry::as_group).unwrap();
    assert_eq!(group.len(), 2);
    assert!(group.leaves().iter().all(|acc| acc.kind() == AccumulatorKind::Raw));

    let metrics = results.metrics(false).unwrap();
    let scores = &metrics.log()["scores_epoch"];
    assert_eq!(
        scores.get("precision").and_then(Nested::as_leaf),
        Some(&Tensor::scalar(0.5))
    );
    assert_eq!(
        scores.get("recall").and_then(Nested::as_leaf),
        Some(&Tensor::scalar(0.25))
    );
}

#[test]
fn test_changing_the_shape_of_a_value_fails() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results
        .log("training_step", "scores", Value::mapping([("a", 1.0)]), both())
        .unwrap();

    let err = results.log("training_step", "scores", 1.0, both()).unwrap_err();
    assert!(matches!(err, MetricErr::StructureMismatch { .. }));

    let err = results
        .log("training_step", "scores", Value::mapping([("b", 1.0)]), both())
        .unwrap_err();
    assert!(matches!(err, MetricErr::StructureMismatch { .. }));
}

#[test]
fn test_rejected_group_update_leaves_every_leaf_untouched() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let opts = || LogOptions::default().reduce_fx("sum");
    results
        .log("training_step", "scores", Value::mapping([("a", 1.0), ("b", 1.0)]), opts())
        .unwrap();

    let value: Value = Nested::Map(BTreeMap::from([
        ("a".to_string(), Value::from(5.0)),
        ("b".to_string(), Value::from(metric::shared(Total::default()))),
    ]));
    let err = results.log("training_step", "scores", value, opts()).unwrap_err();
    assert!(matches!(err, MetricErr::StructureMismatch { key } if key == "training_step.scores"));

    let group = results
        .get("training_step.scores")
        .and_then(Entry::as_group)
        .unwrap();
    for leaf in ["a", "b"] {
        let acc = group.get(leaf).and_then(Nested::as_leaf).unwrap();
        assert_eq!(acc.value(), Some(&Tensor::scalar(1.0)), "{leaf}");
    }
}

#[test]
fn test_nan_reaches_min_and_max() {
    for reduction in ["min", "max"] {
        let mut results = MetricCollection::new(true, Device::Cpu);
        let opts = || LogOptions::default().reduce_fx(reduction);
        for value in [1.0, f32::NAN, 2.0] {
            results.log("training_step", "loss", value, opts()).unwrap();
        }

        let metrics = results.metrics(false).unwrap();
        let loss = metrics.scalar(MetricSource::Log, "loss").unwrap();
        assert!(loss.is_nan(), "{reduction}");
    }
}

#[test]
fn test_empty_values_make_the_epoch_value_nan() {
    for reduction in ["mean", "max"] {
        let mut results = MetricCollection::new(true, Device::Cpu);
        let opts = || LogOptions::default().reduce_fx(reduction);
        results.log("training_step", "loss", 1.0, opts()).unwrap();
        results
            .log("training_step", "loss", Tensor::from_slice(&[]), opts())
            .unwrap();

        let metrics = results.metrics(false).unwrap();
        let loss = metrics.scalar(MetricSource::Log, "loss").unwrap();
        assert!(loss.is_nan(), "{reduction}");
    }
}

#[test]
fn test_values_are_detached_unless_graph_is_enabled() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let loss = || Tensor::scalar(1.0).with_grad_fn("AddBackward0");

    results.log("training_step", "detached", loss(), both()).unwrap();
    results
        .log("training_step", "attached", loss(), both().enable_graph(true))
        .unwrap();

    let metrics = results.metrics(true).unwrap();
    let detached = metrics.log()["detached_step"].as_leaf().unwrap();
    let attached = metrics.log()["attached_step"].as_leaf().unwrap();
    assert!(!detached.requires_grad());
    assert!(attached.requires_grad());
}

#[test]
fn test_xla_values_are_staged_to_host() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let value = Tensor::scalar(2.0).to(Device::Xla(0));
    results.log("training_step", "loss", value, both()).unwrap();

    let metrics = results.metrics(true).unwrap();
    let loss = metrics.log()["loss_step"].as_leaf().unwrap();
    assert_eq!(loss.device(), Device::Cpu);
}

#[test]
fn test_minimize_only_accepts_tensors() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.set_minimize(Some(Tensor::scalar(0.3).into())).unwrap();
    assert_eq!(results.minimize(), Some(&Tensor::scalar(0.3)));

    let err = results
        .set_minimize(Some(Value::metric(metric::shared(Total::default()))))
        .unwrap_err();
    assert!(matches!(err, MetricErr::MinimizeNotTensor { found: "metric" }));

    let err = results
        .set_minimize(Some(Value::mapping([("loss", 0.3)])))
        .unwrap_err();
    assert!(matches!(err, MetricErr::MinimizeNotTensor { found: "mapping" }));

    results.set_minimize(None).unwrap();
    assert!(results.minimize().is_none());
}

#[test]
fn test_extra_must_be_detached() {
    let mut results = MetricCollection::new(true, Device::Cpu);

    let mut extra = BTreeMap::new();
    extra.insert(
        "logits".to_string(),
        Nested::Leaf(Tensor::from_slice(&[0.1, 0.9]).with_grad_fn("MmBackward0")),
    );
    let err = results.set_extra(extra).unwrap_err();
    match err {
        MetricErr::ExtraWithGraph { key, grad_fn } => {
            assert_eq!(key, "logits");
            assert_eq!(grad_fn, "MmBackward0");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(results.extra().is_empty());

    let mut extra = BTreeMap::new();
    extra.insert("logits".to_string(), Nested::Leaf(Tensor::from_slice(&[0.1, 0.9])));
    results.set_extra(extra).unwrap();
    assert_eq!(results.extra().len(), 1);
}

#[test]
fn test_reset_filters_by_kind_and_call_site() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let total = metric::shared(Total::default());
    total.lock().update(2.0);

    results.log("training_step", "loss", 1.0, both()).unwrap();
    results.log("training_step", "total", total.clone(), both()).unwrap();
    results.log("validation_step", "loss", 1.0, both()).unwrap();

    results.reset(Some(true), None);
    assert!(entry_has_reset(&results, "training_step.total"));
    assert!(!entry_has_reset(&results, "training_step.loss"));
    assert_eq!(total.lock().sum, 0.0);

    results.reset(Some(false), Some("validation_step"));
    assert!(entry_has_reset(&results, "validation_step.loss"));
    assert!(!entry_has_reset(&results, "training_step.loss"));

    let keys: Vec<_> = results.valid_items().map(|(key, _)| key).collect();
    assert_eq!(keys, ["training_step.loss"]);

    results.reset(None, None);
    assert_eq!(results.valid_items().count(), 0);
}

#[test]
fn test_reset_entries_are_hidden_from_metrics() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.log("training_step", "loss", 1.0, both()).unwrap();
    results.reset(None, None);

    let metrics = results.metrics(false).unwrap();
    assert!(metrics.log().is_empty());

    results.log("training_step", "loss", 5.0, both()).unwrap();
    let metrics = results.metrics(false).unwrap();
    assert_eq!(metrics.scalar(MetricSource::Log, "loss_epoch"), Some(5.0));
}

#[test]
fn test_progress_bar_needs_scalars() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let value = Tensor::from_slice(&[1.0, 2.0]);
    let opts = LogOptions::default().on_step(true).on_epoch(false).prog_bar(true);
    results.log("training_step", "hist", value, opts).unwrap();

    let err = results.metrics(true).unwrap_err();
    match err {
        MetricErr::NonScalarProgressBar { name, numel } => {
            assert_eq!(name, "hist");
            assert_eq!(numel, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_callback_sees_step_values_only_while_training() {
    let opts = both().prog_bar(true);

    let mut training = MetricCollection::new(true, Device::Cpu);
    training.log("training_step", "loss", 1.0, opts.clone()).unwrap();
    let metrics = training.metrics(true).unwrap();
    assert_eq!(metrics.names(MetricSource::Callback), ["loss", "loss_step"]);
    assert_eq!(metrics.names(MetricSource::Pbar), ["loss_step"]);

    let mut validation = MetricCollection::new(false, Device::Cpu);
    validation.log("validation_step", "loss", 1.0, opts).unwrap();
    assert!(validation.metrics(true).unwrap().callback().is_empty());
    let metrics = validation.metrics(false).unwrap();
    assert_eq!(metrics.names(MetricSource::Callback), ["loss", "loss_epoch"]);
}

#[test]
fn test_to_moves_every_value() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.log("training_step", "loss", 1.0, both()).unwrap();
    results.set_minimize(Some(Tensor::scalar(0.1).into())).unwrap();
    let mut extra = BTreeMap::new();
    extra.insert("logits".to_string(), Nested::Leaf(Tensor::from_slice(&[0.1, 0.9])));
    results.set_extra(extra).unwrap();

    results.to(Device::Cuda(0));
    assert_eq!(results.device(), Device::Cuda(0));
    assert_eq!(results.batch_size().device(), Device::Cuda(0));
    assert_eq!(results.minimize().map(Tensor::device), Some(Device::Cuda(0)));
    let logits = results.extra()["logits"].as_leaf().unwrap();
    assert_eq!(logits.device(), Device::Cuda(0));

    let acc = results.get("training_step.loss").and_then(Entry::as_single).unwrap();
    assert_eq!(acc.value().map(Tensor::device), Some(Device::Cuda(0)));
    assert_eq!(acc.forward_cache().map(Tensor::device), Some(Device::Cuda(0)));

    results.log("training_step", "loss", 3.0, both()).unwrap();
    let metrics = results.cpu().metrics(false).unwrap();
    let loss = metrics.log()["loss_epoch"].as_leaf().unwrap();
    assert_eq!(loss, &Tensor::scalar(2.0));
}

#[test]
fn test_extract_batch_size_updates_the_weight() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    let batch = Batch::Map(vec![(
        "x".to_string(),
        Tensor::from_shape_vec(&[4, 2], vec![0.0; 8]).unwrap().into(),
    )]);

    assert_eq!(results.extract_batch_size(&batch), 4);
    assert_eq!(results.batch_size(), &Tensor::scalar(4.0));
}

#[test]
fn test_state_detaches_minimize() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results
        .set_minimize(Some(Tensor::scalar(0.5).with_grad_fn("MeanBackward0").into()))
        .unwrap();
    results
        .log("training_step", "loss", 2.0, both().reduce_fx(Reduction::Sum))
        .unwrap();

    let state = results.state();
    assert!(!state.minimize.as_ref().unwrap().requires_grad());
    assert!(results.minimize().unwrap().requires_grad());

    let Some(Nested::Leaf(acc)) = state.items.get("training_step.loss") else {
        panic!("expected a single accumulator state");
    };
    assert_eq!(acc.kind, AccumulatorKind::Raw);
    assert_eq!(acc.value, Some(Tensor::scalar(2.0)));
    assert_eq!(acc.cumulated_batch_size, None);

    let json = state.to_json().unwrap();
    assert!(json.contains("\"training\":true"));
}

#[test]
fn test_display() {
    let mut results = MetricCollection::new(true, Device::Cpu);
    results.log("h", "a", 4.0, both()).unwrap();

    assert_eq!(
        results.to_string(),
        "MetricCollection(true, cpu, {'h.a': Accumulator(value=tensor(4), cumulated_batch_size=tensor(1))})"
    );
}
