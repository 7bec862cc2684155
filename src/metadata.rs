use crate::{error::Result, options::LogOptions, reduction::Reduction, sync::SyncPolicy};

/// Everything known about a logged quantity besides its values.
///
/// Built once, the first time a key is logged, and compared against every later log
/// call under the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMetadata {
    fx: String,
    name: String,
    prog_bar: bool,
    logger: bool,
    on_step: bool,
    on_epoch: bool,
    reduction: Reduction,
    enable_graph: bool,
    dataloader_idx: Option<usize>,
    sync: SyncPolicy,
}

impl LogMetadata {
    /// Creates a new `LogMetadata`.
    ///
    /// # Args
    /// * `fx` - The call site the value was logged from.
    /// * `name` - The name it was logged under.
    /// * `opts` - How the value should be reduced and exposed.
    ///
    /// # Errors
    /// `MetricErr::UnsupportedReduction` if `opts.reduce_fx` isn't one of `min`, `max`, `mean`
    /// or `sum` (`avg` being an alias of `mean`).
    pub fn new(fx: &str, name: &str, opts: &LogOptions) -> Result<Self> {
        let reduction = opts.reduce_fx.resolve()?;
        let sync = SyncPolicy::new(
            opts.sync_dist,
            opts.sync_dist_fn.clone(),
            opts.sync_dist_group.clone(),
        )
        .with_op(reduction);

        Ok(Self {
            fx: fx.to_string(),
            name: name.to_string(),
            prog_bar: opts.prog_bar,
            logger: opts.logger,
            on_step: opts.on_step,
            on_epoch: opts.on_epoch,
            reduction,
            enable_graph: opts.enable_graph,
            dataloader_idx: opts.dataloader_idx,
            sync,
        })
    }

    pub fn fx(&self) -> &str {
        &self.fx
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prog_bar(&self) -> bool {
        self.prog_bar
    }

    pub fn logger(&self) -> bool {
        self.logger
    }

    pub fn on_step(&self) -> bool {
        self.on_step
    }

    pub fn on_epoch(&self) -> bool {
        self.on_epoch
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    pub fn enable_graph(&self) -> bool {
        self.enable_graph
    }

    pub fn dataloader_idx(&self) -> Option<usize> {
        self.dataloader_idx
    }

    pub fn sync(&self) -> &SyncPolicy {
        &self.sync
    }

    /// Whether the value is exposed both per step and per epoch.
    pub fn forked(&self) -> bool {
        self.on_step && self.on_epoch
    }

    /// The name to expose the value under for a step or an epoch read.
    pub fn forked_name(&self, on_step: bool) -> String {
        if !self.forked() {
            return self.name.clone();
        }

        let suffix = if on_step { "step" } else { "epoch" };
        format!("{}_{suffix}", self.name)
    }

    /// Only updated on step, so there's nothing to accumulate across the epoch.
    pub(crate) fn step_only(&self) -> bool {
        self.on_step && !self.on_epoch
    }

    pub fn is_mean_reduction(&self) -> bool {
        self.reduction == Reduction::Mean
    }

    pub fn is_sum_reduction(&self) -> bool {
        self.reduction == Reduction::Sum
    }

    pub fn is_max_reduction(&self) -> bool {
        self.reduction == Reduction::Max
    }

    pub fn is_min_reduction(&self) -> bool {
        self.reduction == Reduction::Min
    }

    /// Never true once built, custom reductions are rejected by [`LogMetadata::new`].
    pub fn is_custom_reduction(&self) -> bool {
        !(self.is_mean_reduction()
            || self.is_sum_reduction()
            || self.is_max_reduction()
            || self.is_min_reduction())
    }
}
