mod common;

use std::{fs, path::Path};

use machine_learning::{MlErr, data::Dataset};
use orchestrator::{
    CheckpointTag, OrchestratorError,
    configs::{EvaluateArgs, PARAMS_FILE, TrainArgs},
    results, run_evaluation, run_training,
};
use serde_json::json;

use common::separable;

fn write_split(dir: &Path, split: &str, dataset: &Dataset) {
    let indices: Vec<_> = (0..dataset.len()).collect();
    let batch = dataset.batch(&indices);

    let features: Vec<Vec<f32>> = batch.inputs.rows().into_iter().map(|r| r.to_vec()).collect();
    let labels: Vec<f32> = batch.labels.column(0).to_vec();

    let raw = json!({ "features": features, "labels": labels });
    fs::write(dir.join(format!("{split}.json")), raw.to_string()).unwrap();
}

fn workspace() -> (tempfile::TempDir, TrainArgs) {
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join("data");
    let model_dir = root.path().join("model");
    fs::create_dir_all(&data_dir).unwrap();
    fs::create_dir_all(&model_dir).unwrap();

    write_split(&data_dir, "train", &separable(24, 0.0));
    write_split(&data_dir, "val", &separable(8, 0.5));
    write_split(&data_dir, "test", &separable(8, 0.25));

    let params = json!({
        "learning_rate": 0.3,
        "batch_size": 4,
        "num_epochs": 2,
        "save_summary_steps": 2,
        "optimizer": "momentum",
    });
    fs::write(model_dir.join(PARAMS_FILE), params.to_string()).unwrap();

    let args = TrainArgs {
        data_dir,
        model_dir,
        restore_file: None,
        local_rank: -1,
    };

    (root, args)
}

#[test]
fn train_then_evaluate_a_model_directory() {
    let (_root, args) = workspace();

    let report = run_training(&args).unwrap();
    assert_eq!(report.epochs.len(), 2);

    for file in [
        "last.safetensors",
        "best.safetensors",
        results::VAL_BEST_FILE,
        results::VAL_LAST_FILE,
    ] {
        assert!(args.model_dir.join(file).exists(), "{file} is missing");
    }

    let eval = EvaluateArgs {
        data_dir: args.data_dir.clone(),
        model_dir: args.model_dir.clone(),
        restore_file: CheckpointTag::Best,
        local_rank: -1,
    };
    let result = run_evaluation(&eval).unwrap();

    let stored = results::read(&args.model_dir.join("metrics_test_best.json")).unwrap();
    assert_eq!(stored, Some(result));
}

#[test]
fn restoring_the_last_checkpoint_of_a_finished_run() {
    let (_root, mut args) = workspace();
    run_training(&args).unwrap();

    args.restore_file = Some(CheckpointTag::Last);
    let report = run_training(&args).unwrap();

    assert_eq!(report.start_epoch, 2);
    assert!(report.epochs.is_empty());
}

#[test]
fn a_model_directory_without_params_is_a_config_error() {
    let (_root, args) = workspace();
    fs::remove_file(args.model_dir.join(PARAMS_FILE)).unwrap();

    assert!(matches!(
        run_training(&args),
        Err(OrchestratorError::Config { .. })
    ));
}

#[test]
fn evaluating_before_training_fails() {
    let (_root, args) = workspace();
    let eval = EvaluateArgs {
        data_dir: args.data_dir.clone(),
        model_dir: args.model_dir.clone(),
        restore_file: CheckpointTag::Last,
        local_rank: -1,
    };

    assert!(matches!(
        run_evaluation(&eval),
        Err(OrchestratorError::CheckpointNotFound { .. })
    ));
}

#[test]
fn labels_outside_the_classes_stop_training_before_any_epoch() {
    let (_root, args) = workspace();
    let raw = json!({ "features": [[0.0, 1.0], [1.0, 0.0]], "labels": [1, -1] });
    fs::write(args.data_dir.join("train.json"), raw.to_string()).unwrap();

    let err = run_training(&args).unwrap_err();

    assert!(matches!(
        &err,
        OrchestratorError::Ml(MlErr::Dataset { path, .. }) if path.ends_with("train.json")
    ));
    assert!(!args.model_dir.join("last.safetensors").exists());
}

#[test]
fn mse_labels_must_match_the_output_width() {
    let (_root, args) = workspace();
    let params = json!({
        "learning_rate": 0.1,
        "batch_size": 4,
        "num_epochs": 1,
        "loss": "mse",
        "num_classes": 3,
    });
    fs::write(args.model_dir.join(PARAMS_FILE), params.to_string()).unwrap();

    assert!(matches!(
        run_training(&args),
        Err(OrchestratorError::Ml(MlErr::Dataset { .. }))
    ));
}
