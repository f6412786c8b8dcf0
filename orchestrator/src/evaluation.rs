use std::num::NonZeroUsize;

use log::info;
use machine_learning::{
    DistributedContext, EpochRunner, arch::Model, arch::loss::LossFn, data::DataLoader,
    metrics::{EpochResult, Metrics},
};

use crate::{
    Result,
    checkpoint::{CheckpointStore, CheckpointTag},
    results,
};

/// Evaluates a stored checkpoint over a whole split.
///
/// Unlike resuming a training run, a missing checkpoint is an error here. Only the model's
/// state is restored. The leader writes the metrics to `metrics_test_<tag>.json` in the
/// store's directory.
///
/// # Arguments
/// * `ctx` - The worker's context.
/// * `model` - A model of the architecture the checkpoint was saved from.
/// * `loss_fn` - The loss to report.
/// * `metrics` - The metrics to report besides the loss.
/// * `loader` - Produces the split's batches.
/// * `store` - Holds the checkpoint.
/// * `tag` - The checkpoint to evaluate.
///
/// # Returns
/// The split's metrics.
pub fn evaluate_checkpoint<M, L>(
    ctx: &DistributedContext,
    model: &mut M,
    loss_fn: &L,
    metrics: Metrics,
    loader: &mut DataLoader,
    store: &CheckpointStore,
    tag: CheckpointTag,
) -> Result<EpochResult>
where
    M: Model + ?Sized,
    L: LossFn + ?Sized,
{
    CheckpointStore::load(&store.path(tag), model, None)?;

    let mut runner = EpochRunner::new(ctx, metrics, NonZeroUsize::MIN);
    let result = runner.evaluate(model, loss_fn, loader.batches())?;
    info!("- Test metrics : {result}");

    if ctx.is_leader() {
        results::write(&store.dir().join(results::test_file(tag)), &result)?;
    }

    Ok(result)
}
