mod common;

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use comms::SharedCollective;
use machine_learning::{
    DistributedContext,
    arch::{Linear, Model, loss::CrossEntropy},
    data::{DataLoader, SequentialSampler},
    device::Cpu,
    metrics::Metrics,
    optimization::{Adam, Optimizer},
};
use orchestrator::{
    CheckpointStore, CheckpointTag, OrchestratorError, Phase, TrainingReport,
    configs::Params,
    evaluation::evaluate_checkpoint,
    results::{self, VAL_BEST_FILE, VAL_LAST_FILE},
};
use serde_json::json;

use common::{VAL_SAMPLES, build_orchestrator, params, separable};

#[test]
fn fixed_seed_runs_are_identical() {
    let params = params(json!({}));

    let run = || {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = build_orchestrator(DistributedContext::default(), &params, dir.path());
        let report = orchestrator.run().unwrap();
        (report, orchestrator.model().params().to_vec())
    };

    let (first, first_params) = run();
    let (second, second_params) = run();

    assert_eq!(first.epochs.len(), 3);
    assert_eq!(first, second);
    assert_eq!(first_params, second_params);
}

#[test]
fn reduced_precision_runs_every_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({"fp16": true}));
    let mut orchestrator = build_orchestrator(DistributedContext::default(), &params, dir.path());

    let report = orchestrator.run().unwrap();

    assert_eq!(report.epochs.len(), 3);
    assert!(orchestrator.model().params().iter().all(|p| p.is_finite()));
    assert!(report.epochs.iter().all(|e| e.val.get("loss").unwrap().is_finite()));
}

#[test]
fn the_leader_writes_checkpoints_and_results() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({}));
    let mut orchestrator = build_orchestrator(DistributedContext::default(), &params, dir.path());

    assert_eq!(orchestrator.phase(), Phase::Init);
    let report = orchestrator.run().unwrap();
    assert_eq!(orchestrator.phase(), Phase::Terminated);

    // The first epoch always beats the initial best.
    assert!(report.epochs[0].is_best);

    let store = CheckpointStore::new(dir.path());
    assert!(store.path(CheckpointTag::Last).exists());
    assert!(store.path(CheckpointTag::Best).exists());

    let last_val = &report.epochs.last().unwrap().val;
    let best_val = &report.epochs.iter().rev().find(|e| e.is_best).unwrap().val;

    let stored_last = results::read(&dir.path().join(VAL_LAST_FILE)).unwrap().unwrap();
    let stored_best = results::read(&dir.path().join(VAL_BEST_FILE)).unwrap().unwrap();
    assert_eq!(&stored_last, last_val);
    assert_eq!(&stored_best, best_val);
    assert_eq!(stored_best.get("accuracy"), report.best);
}

#[test]
fn checkpoints_restore_model_and_optimizer() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({"optimizer": "adam", "learning_rate": 0.05, "num_epochs": 2}));
    let mut orchestrator = build_orchestrator(DistributedContext::default(), &params, dir.path());
    orchestrator.run().unwrap();

    let mut model = Linear::new(2, 2, 99);
    let mut adam = Adam::with_defaults(model.size(), 0.05);
    let path = CheckpointStore::new(dir.path()).path(CheckpointTag::Last);

    let optimizer: &mut dyn Optimizer = &mut adam;
    let epoch = CheckpointStore::load(&path, &mut model, Some(optimizer)).unwrap();

    assert_eq!(epoch, 2);
    assert_eq!(model.params(), orchestrator.model().params());
    assert_eq!(adam.state_dict(), orchestrator.optimizer().state_dict());
}

#[test]
fn checkpoints_of_another_architecture_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({"num_epochs": 1}));
    build_orchestrator(DistributedContext::default(), &params, dir.path()).run().unwrap();

    let path = CheckpointStore::new(dir.path()).path(CheckpointTag::Last);
    let mut wider = Linear::new(3, 2, 0);

    assert!(matches!(
        CheckpointStore::load(&path, &mut wider, None),
        Err(OrchestratorError::CheckpointFormat { .. })
    ));
}

#[test]
fn a_missing_restore_checkpoint_starts_from_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({"num_epochs": 1}));
    let mut orchestrator = build_orchestrator(DistributedContext::default(), &params, dir.path());

    assert_eq!(orchestrator.resume(Some(CheckpointTag::Last)).unwrap(), 0);
    assert_eq!(orchestrator.best(), Some(f32::NEG_INFINITY));
    assert_eq!(orchestrator.run().unwrap().epochs.len(), 1);

    let mut model = Linear::new(2, 2, 0);
    let missing = dir.path().join("nowhere.safetensors");
    assert!(matches!(
        CheckpointStore::load(&missing, &mut model, None),
        Err(OrchestratorError::CheckpointNotFound { path }) if path == missing
    ));
}

#[test]
fn resuming_continues_the_lineage() {
    let dir = tempfile::tempdir().unwrap();

    let params_of = |num_epochs: usize| params(json!({ "num_epochs": num_epochs }));

    let mut first = build_orchestrator(DistributedContext::default(), &params_of(2), dir.path());
    let first_report = first.run().unwrap();
    let best_at_save = first_report.best.unwrap();

    let mut resumed = build_orchestrator(DistributedContext::default(), &params_of(4), dir.path());
    assert_eq!(resumed.resume(Some(CheckpointTag::Last)).unwrap(), 2);
    assert_eq!(resumed.model().params(), first.model().params());
    assert_eq!(resumed.best(), Some(best_at_save));

    let report = resumed.run().unwrap();
    assert_eq!(report.start_epoch, 2);
    assert_eq!(report.epochs.iter().map(|e| e.epoch).collect::<Vec<_>>(), [2, 3]);
    assert!(report.best.unwrap() >= best_at_save);
}

#[test]
fn resuming_a_finished_run_trains_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({"num_epochs": 1}));
    build_orchestrator(DistributedContext::default(), &params, dir.path()).run().unwrap();

    let mut resumed = build_orchestrator(DistributedContext::default(), &params, dir.path());
    assert_eq!(resumed.resume(Some(CheckpointTag::Best)).unwrap(), 1);
    assert!(resumed.run().unwrap().epochs.is_empty());
}

#[test]
fn evaluating_the_best_checkpoint_reproduces_its_validation() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({}));
    let report = build_orchestrator(DistributedContext::default(), &params, dir.path())
        .run()
        .unwrap();
    let best_val = &report.epochs.iter().rev().find(|e| e.is_best).unwrap().val;

    let ctx = DistributedContext::default();
    let mut model = orchestrator::build_model(&params, &ctx, 2);
    let val = Arc::new(separable(VAL_SAMPLES, 0.5));
    let mut loader = DataLoader::new(val, SequentialSampler, params.batch_size);
    let store = CheckpointStore::new(dir.path());

    let result = evaluate_checkpoint(
        &ctx,
        &mut model,
        &CrossEntropy,
        Metrics::from_names(["accuracy"]).unwrap(),
        &mut loader,
        &store,
        CheckpointTag::Best,
    )
    .unwrap();

    assert_eq!(&result, best_val);

    let stored = results::read(&dir.path().join(results::test_file(CheckpointTag::Best)));
    assert_eq!(stored.unwrap(), Some(result));
}

#[test]
fn evaluating_a_missing_checkpoint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({}));
    let ctx = DistributedContext::default();
    let mut model = orchestrator::build_model(&params, &ctx, 2);
    let mut loader = DataLoader::new(
        Arc::new(separable(VAL_SAMPLES, 0.5)),
        SequentialSampler,
        params.batch_size,
    );

    assert!(matches!(
        evaluate_checkpoint(
            &ctx,
            &mut model,
            &CrossEntropy,
            Metrics::new(),
            &mut loader,
            &CheckpointStore::new(dir.path()),
            CheckpointTag::Last,
        ),
        Err(OrchestratorError::CheckpointNotFound { .. })
    ));
}

#[test]
fn a_distributed_group_stays_in_lockstep() {
    const WORLD_SIZE: usize = 2;

    let dir = tempfile::tempdir().unwrap();
    let params = params(json!({"distributed": true, "num_epochs": 2}));
    let group = comms::local_group(WORLD_SIZE, Duration::from_secs(10)).unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .map(|member| {
            let params = params.clone();
            let dir = dir.path().to_path_buf();

            thread::spawn(move || -> (TrainingReport, Vec<f32>) {
                let collective = SharedCollective::new(member);
                let ctx = DistributedContext::distributed(collective, Arc::new(Cpu));
                let mut orchestrator = build_orchestrator(ctx, &params, &dir);
                let report = orchestrator.run().unwrap();
                (report, orchestrator.model().params().to_vec())
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let (leader, leader_params) = &outcomes[0];
    let (follower, follower_params) = &outcomes[1];

    assert_eq!(leader_params, follower_params);
    assert!(leader.best.is_some());
    assert_eq!(follower.best, None);

    for (l, f) in leader.epochs.iter().zip(&follower.epochs) {
        assert_eq!(l.train, f.train);
        assert_eq!(l.val, f.val);
        assert!(!f.is_best);
    }

    assert!(CheckpointStore::new(dir.path()).path(CheckpointTag::Last).exists());
}

fn resume_in_group(dirs: [PathBuf; 2], params: &Params) -> Vec<orchestrator::Result<usize>> {
    let group = comms::local_group(dirs.len(), Duration::from_secs(10)).unwrap();

    let handles: Vec<_> = group
        .into_iter()
        .zip(dirs)
        .map(|(member, dir)| {
            let params = params.clone();

            thread::spawn(move || {
                let collective = SharedCollective::new(member);
                let ctx = DistributedContext::distributed(collective, Arc::new(Cpu));
                build_orchestrator(ctx, &params, &dir).resume(Some(CheckpointTag::Last))
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn a_group_resumes_only_if_every_worker_sees_the_same_epoch() {
    let trained = tempfile::tempdir().unwrap();
    let empty = tempfile::tempdir().unwrap();
    let local = params(json!({"num_epochs": 2}));
    build_orchestrator(DistributedContext::default(), &local, trained.path()).run().unwrap();

    let distributed = params(json!({"distributed": true, "num_epochs": 4}));

    let agreeing = resume_in_group(
        [trained.path().to_path_buf(), trained.path().to_path_buf()],
        &distributed,
    );
    assert!(agreeing.iter().all(|r| matches!(r, Ok(2))));

    let split = resume_in_group(
        [trained.path().to_path_buf(), empty.path().to_path_buf()],
        &distributed,
    );
    for outcome in split {
        assert!(matches!(
            outcome,
            Err(OrchestratorError::ResumeMismatch { group_mean, .. }) if group_mean == 1.0
        ));
    }
}
