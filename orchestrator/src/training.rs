use std::path::PathBuf;

use comms::Collective;
use log::{info, warn};
use machine_learning::{
    DistributedContext, EpochRunner, PrecisionPolicy, arch::Model, arch::loss::LossFn,
    data::DataLoader, metrics::EpochResult, optimization::Optimizer,
};

use crate::{
    OrchestratorError, Result,
    checkpoint::{CheckpointRecord, CheckpointStore, CheckpointTag},
    configs::Params,
    results,
    tracker::BestScoreTracker,
};

/// Where a `TrainingOrchestrator` is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Resuming,
    Running { epoch: usize },
    Terminated,
}

/// The metrics of a finished epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: EpochResult,
    pub val: EpochResult,
    /// Whether the epoch produced a new best checkpoint, always false off the leader.
    pub is_best: bool,
}

/// What a training run went through.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// The epoch the run started at, non zero when resumed.
    pub start_epoch: usize,
    pub epochs: Vec<EpochReport>,
    /// The best validation score of the lineage, only known by the leader.
    pub best: Option<f32>,
}

/// Drives the epochs of a training run on one worker.
///
/// Every worker of a group runs its own orchestrator over its shard of the data. The leader's
/// is the only one that tracks the best score and writes checkpoints and results.
pub struct TrainingOrchestrator<M, O> {
    ctx: DistributedContext,
    model: M,
    optimizer: O,
    loss_fn: Box<dyn LossFn>,
    precision: PrecisionPolicy,
    runner: EpochRunner,
    train_loader: DataLoader,
    val_loader: DataLoader,
    store: CheckpointStore,
    tracker: Option<BestScoreTracker>,
    primary_metric: String,
    num_epochs: usize,
    start_epoch: usize,
    phase: Phase,
}

impl<M, O> TrainingOrchestrator<M, O>
where
    M: Model,
    O: Optimizer,
{
    /// Creates a new `TrainingOrchestrator`.
    ///
    /// # Arguments
    /// * `ctx` - The worker's context.
    /// * `model` - The model to fit, already replicated across the group if distributed.
    /// * `optimizer` - Updates the model's parameters.
    /// * `params` - The run's hyperparameters.
    /// * `train_loader` - Produces the training batches of each epoch.
    /// * `val_loader` - Produces the validation batches of each epoch.
    /// * `model_dir` - Receives checkpoints and metrics.
    ///
    /// # Returns
    /// The orchestrator in its `Init` phase, or an error if `params` name unknown metrics.
    pub fn new(
        ctx: DistributedContext,
        model: M,
        optimizer: O,
        params: &Params,
        train_loader: DataLoader,
        val_loader: DataLoader,
        model_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let runner = EpochRunner::new(&ctx, params.metrics()?, params.save_summary_steps);
        let tracker = ctx.is_leader().then(BestScoreTracker::new);

        Ok(Self {
            model,
            optimizer,
            loss_fn: params.loss_fn(),
            precision: params.precision(),
            runner,
            train_loader,
            val_loader,
            store: CheckpointStore::new(model_dir),
            tracker,
            primary_metric: params.primary_metric.clone(),
            num_epochs: params.num_epochs,
            start_epoch: 0,
            phase: Phase::Init,
            ctx,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Returns the best score so far, `None` off the leader.
    pub fn best(&self) -> Option<f32> {
        self.tracker.map(|tracker| tracker.best())
    }

    /// Restores the model and optimizer from the `tag` checkpoint, if any.
    ///
    /// A missing checkpoint isn't an error, training then starts from scratch. Once a
    /// checkpoint is restored the leader also recovers the lineage's best score from its
    /// best validation metrics. In a group every worker must call this, they then check
    /// they all resume at the same epoch.
    ///
    /// # Arguments
    /// * `tag` - The checkpoint to resume from, `None` to start from scratch.
    ///
    /// # Returns
    /// The epoch training will resume at, or an error if the checkpoint doesn't fit or the
    /// group disagrees on the epoch.
    pub fn resume(&mut self, tag: Option<CheckpointTag>) -> Result<usize> {
        let start_epoch = self.restore(tag)?;

        if self.ctx.is_distributed() {
            self.check_group_resumes_at(start_epoch)?;
        }

        Ok(start_epoch)
    }

    fn restore(&mut self, tag: Option<CheckpointTag>) -> Result<usize> {
        let Some(tag) = tag else {
            return Ok(self.start_epoch);
        };

        self.phase = Phase::Resuming;
        let path = self.store.path(tag);
        info!("restoring parameters from {}", path.display());

        let optimizer: &mut dyn Optimizer = &mut self.optimizer;
        let epoch = match CheckpointStore::load(&path, &mut self.model, Some(optimizer)) {
            Ok(epoch) => epoch,
            Err(OrchestratorError::CheckpointNotFound { path }) => {
                warn!("no checkpoint at {}, training from scratch", path.display());
                return Ok(self.start_epoch);
            }
            Err(e) => return Err(e),
        };

        self.start_epoch = epoch.min(self.num_epochs);

        if let Some(tracker) = self.tracker.as_mut() {
            let (best_path, _) = results::val_paths(self.store.dir());
            let best = results::read(&best_path)?.and_then(|best| best.get(&self.primary_metric));

            if let Some(best) = best {
                *tracker = BestScoreTracker::starting_at(best);
                info!(best = best; "resumed best {}", self.primary_metric);
            }
        }

        Ok(self.start_epoch)
    }

    /// Fails on every worker unless they all resume at `start_epoch`.
    fn check_group_resumes_at(&mut self, start_epoch: usize) -> Result<()> {
        let epoch = start_epoch as f32;
        let mut moments = [epoch, epoch * epoch];
        self.ctx.collective().clone().all_reduce_mean(&mut moments)?;

        // The reduced moments are the same on every worker, so is the verdict.
        let [mean, mean_sq] = moments;
        if mean_sq != mean * mean {
            return Err(OrchestratorError::ResumeMismatch {
                start_epoch,
                group_mean: mean,
            });
        }

        Ok(())
    }

    /// Trains and evaluates every remaining epoch.
    ///
    /// # Returns
    /// The metrics of every epoch run, or the first error, which leaves the checkpoints of
    /// the last completed epoch in place.
    pub fn run(&mut self) -> Result<TrainingReport> {
        let mut epochs = Vec::with_capacity(self.num_epochs - self.start_epoch);

        for epoch in self.start_epoch..self.num_epochs {
            self.phase = Phase::Running { epoch };
            info!("Epoch {}/{}", epoch + 1, self.num_epochs);

            if self.ctx.is_distributed() {
                self.train_loader.set_epoch(epoch);
            }

            let train = self.runner.train(
                &mut self.model,
                &mut self.optimizer,
                &self.loss_fn,
                &mut self.precision,
                self.train_loader.batches(),
            )?;
            info!("- Train metrics: {train}");

            let val = self
                .runner
                .evaluate(&mut self.model, &self.loss_fn, self.val_loader.batches())?;
            info!("- Eval metrics : {val}");

            let is_best = self.record(epoch, &val)?;

            epochs.push(EpochReport {
                epoch,
                train,
                val,
                is_best,
            });
        }

        self.phase = Phase::Terminated;

        Ok(TrainingReport {
            start_epoch: self.start_epoch,
            epochs,
            best: self.best(),
        })
    }

    /// Updates the best score, checkpoints and results after `epoch`, on the leader only.
    fn record(&mut self, epoch: usize, val: &EpochResult) -> Result<bool> {
        let Some(tracker) = self.tracker.as_mut() else {
            return Ok(false);
        };

        let score = val.get(&self.primary_metric).ok_or_else(|| {
            OrchestratorError::config(
                "primary_metric",
                format!("{} isn't produced by the evaluation", self.primary_metric),
            )
        })?;
        let is_best = tracker.observe(score);

        let record = CheckpointRecord::capture(epoch + 1, &self.model, &self.optimizer);
        self.store.save(&record, is_best)?;

        let (best_path, last_path) = results::val_paths(self.store.dir());

        if is_best {
            info!("- Found new best {}", self.primary_metric);
            results::write(&best_path, val)?;
        }

        results::write(&last_path, val)?;

        Ok(is_best)
    }
}
