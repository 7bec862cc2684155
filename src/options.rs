use std::fmt;

use serde::Deserialize;

use crate::{error::Result, reduction::ReduceFx, sync::SyncFn};

/// How a logged value is reduced, synchronized and exposed.
///
/// The defaults log to the logger only, once per epoch, averaging the values of every step.
/// Everything but the synchronization function can be read from JSON:
///
/// ```
/// use metric_results::LogOptions;
///
/// let opts = LogOptions::from_json(r#"{ "on_step": true, "reduce_fx": "max" }"#).unwrap();
/// assert!(opts.on_step && opts.on_epoch);
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    pub prog_bar: bool,
    pub logger: bool,
    pub on_step: bool,
    pub on_epoch: bool,
    pub reduce_fx: ReduceFx,
    pub enable_graph: bool,
    pub sync_dist: bool,
    #[serde(skip)]
    pub sync_dist_fn: Option<SyncFn>,
    pub sync_dist_group: Option<String>,
    pub dataloader_idx: Option<usize>,
    pub batch_size: Option<usize>,
}

impl LogOptions {
    /// Parses options from a JSON object, missing fields keep their defaults.
    ///
    /// # Errors
    /// `MetricErr::Json` if `json` isn't a valid options object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn prog_bar(mut self, prog_bar: bool) -> Self {
        self.prog_bar = prog_bar;
        self
    }

    pub fn logger(mut self, logger: bool) -> Self {
        self.logger = logger;
        self
    }

    pub fn on_step(mut self, on_step: bool) -> Self {
        self.on_step = on_step;
        self
    }

    pub fn on_epoch(mut self, on_epoch: bool) -> Self {
        self.on_epoch = on_epoch;
        self
    }

    pub fn reduce_fx(mut self, reduce_fx: impl Into<ReduceFx>) -> Self {
        self.reduce_fx = reduce_fx.into();
        self
    }

    pub fn enable_graph(mut self, enable_graph: bool) -> Self {
        self.enable_graph = enable_graph;
        self
    }

    /// Synchronizes values across processes with `sync_fn` when they are computed.
    pub fn sync_dist(mut self, sync_fn: SyncFn, group: Option<String>) -> Self {
        self.sync_dist = true;
        self.sync_dist_fn = Some(sync_fn);
        self.sync_dist_group = group;
        self
    }

    pub fn dataloader_idx(mut self, dataloader_idx: usize) -> Self {
        self.dataloader_idx = Some(dataloader_idx);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            prog_bar: false,
            logger: true,
            on_step: false,
            on_epoch: true,
            reduce_fx: ReduceFx::default(),
            enable_graph: false,
            sync_dist: false,
            sync_dist_fn: None,
            sync_dist_group: None,
            dataloader_idx: None,
            batch_size: None,
        }
    }
}

impl fmt::Debug for LogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("prog_bar", &self.prog_bar)
            .field("logger", &self.logger)
            .field("on_step", &self.on_step)
            .field("on_epoch", &self.on_epoch)
            .field("reduce_fx", &self.reduce_fx)
            .field("enable_graph", &self.enable_graph)
            .field("sync_dist", &self.sync_dist)
            .field("sync_dist_group", &self.sync_dist_group)
            .field("dataloader_idx", &self.dataloader_idx)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}
