use std::{path::Path, sync::Arc};

use comms::{SharedCollective, TcpCollective};
use log::info;
use machine_learning::{
    DistributedContext, MlErr,
    arch::{DataParallel, Linear, Model},
    data::{DataLoader, Dataset, DistributedSampler, RandomSampler, SequentialSampler},
    device::Cpu,
    metrics::EpochResult,
};

use crate::{
    Result,
    checkpoint::CheckpointStore,
    configs::{EvaluateArgs, Params, Rendezvous, TrainArgs},
    evaluation,
    training::{TrainingOrchestrator, TrainingReport},
};

/// Builds the worker's context, joining the launcher's group when distributed.
///
/// # Arguments
/// * `params` - The run's hyperparameters.
/// * `rank` - The launcher's rank, the worker only joins a group if `params` ask for it too.
pub fn build_context(params: &Params, rank: Option<usize>) -> Result<DistributedContext> {
    let Some(rank) = rank.filter(|_| params.distributed) else {
        return Ok(DistributedContext::local(Arc::new(Cpu)));
    };

    let rendezvous = Rendezvous::from_env()?;
    info!(
        rank = rank, world_size = rendezvous.world_size;
        "joining the group at {}", rendezvous.addr
    );

    let collective = TcpCollective::rendezvous(
        rendezvous.addr,
        rank,
        rendezvous.world_size,
        params.collective_timeout(),
    )?;

    Ok(DistributedContext::distributed(
        SharedCollective::new(collective),
        Arc::new(Cpu),
    ))
}

/// Builds the model every worker starts from, replicas share the seed.
pub fn build_model(params: &Params, ctx: &DistributedContext, num_features: usize) -> DataParallel<Linear> {
    let linear = Linear::new(num_features, params.num_classes, params.seed);
    DataParallel::new(linear, ctx.collective().clone())
}

/// A loader over the worker's shard, reshuffled every epoch.
pub fn train_loader(params: &Params, ctx: &DistributedContext, dataset: Arc<Dataset>) -> DataLoader {
    match ctx.rank() {
        Some(rank) => {
            let sampler = DistributedSampler::new(rank, ctx.world_size(), params.seed, true);
            DataLoader::new(dataset, sampler, params.batch_size)
        }
        None => DataLoader::new(dataset, RandomSampler::new(params.seed), params.batch_size),
    }
}

/// A loader over the worker's shard, in order.
pub fn eval_loader(params: &Params, ctx: &DistributedContext, dataset: Arc<Dataset>) -> DataLoader {
    match ctx.rank() {
        Some(rank) => {
            let sampler = DistributedSampler::new(rank, ctx.world_size(), params.seed, false);
            DataLoader::new(dataset, sampler, params.batch_size)
        }
        None => DataLoader::new(dataset, SequentialSampler, params.batch_size),
    }
}

/// Loads the `split` of the dataset under `data_dir`, failing if its labels don't fit the
/// configured loss and output width.
fn load_split(params: &Params, data_dir: &Path, split: &str) -> Result<Arc<Dataset>> {
    let dataset = Dataset::load(data_dir, split)?;

    dataset
        .check_labels(&params.loss_fn(), params.num_classes)
        .map_err(|e| MlErr::Dataset {
            path: data_dir.join(format!("{split}.json")),
            reason: e.to_string(),
        })?;

    Ok(Arc::new(dataset))
}

/// Runs the `train` command.
pub fn run_training(args: &TrainArgs) -> Result<TrainingReport> {
    let params = Params::load(&args.model_dir)?;
    let ctx = build_context(&params, args.rank())?;
    info!("{ctx:?}");

    info!("loading the datasets");
    let train_set = load_split(&params, &args.data_dir, "train")?;
    let val_set = load_split(&params, &args.data_dir, "val")?;
    info!(train = train_set.len(), val = val_set.len(); "datasets loaded");

    let model = build_model(&params, &ctx, train_set.num_features());
    let optimizer = params.optimizer(model.params().len());
    let train_loader = train_loader(&params, &ctx, train_set);
    let val_loader = eval_loader(&params, &ctx, val_set);

    let mut orchestrator = TrainingOrchestrator::new(
        ctx,
        model,
        optimizer,
        &params,
        train_loader,
        val_loader,
        &args.model_dir,
    )?;

    orchestrator.resume(args.restore_file)?;
    info!("starting training for {} epoch(s)", params.num_epochs);
    orchestrator.run()
}

/// Runs the `evaluate` command.
pub fn run_evaluation(args: &EvaluateArgs) -> Result<EpochResult> {
    let params = Params::load(&args.model_dir)?;
    let ctx = build_context(&params, args.rank())?;

    let test_set = load_split(&params, &args.data_dir, "test")?;
    info!(test = test_set.len(); "dataset loaded");

    let mut model = build_model(&params, &ctx, test_set.num_features());
    let mut loader = eval_loader(&params, &ctx, test_set);

    info!("starting evaluation of the {} checkpoint", args.restore_file);
    evaluation::evaluate_checkpoint(
        &ctx,
        &mut model,
        &params.loss_fn(),
        params.metrics()?,
        &mut loader,
        &CheckpointStore::new(&args.model_dir),
        args.restore_file,
    )
}
