#![allow(dead_code)]

use std::{path::Path, sync::Arc};

use machine_learning::{
    DistributedContext,
    arch::{DataParallel, Linear, Model},
    data::Dataset,
    optimization::Optimizer,
};
use ndarray::Array2;
use orchestrator::{
    TrainingOrchestrator, build_model, configs::Params, eval_loader, train_loader,
};
use serde_json::{Value, json};

pub type Orchestrator = TrainingOrchestrator<DataParallel<Linear>, Box<dyn Optimizer>>;

pub const TRAIN_SAMPLES: usize = 40;
pub const VAL_SAMPLES: usize = 16;

/// Two features, labelled by the side of the `x + y = 0` line they fall on.
pub fn separable(n: usize, phase: f32) -> Dataset {
    let mut features = Array2::zeros((n, 2));
    let mut labels = Array2::zeros((n, 1));

    for i in 0..n {
        let t = i as f32 + phase;
        let (x, y) = ((t * 0.37).sin(), (t * 0.91).cos());

        features[[i, 0]] = x;
        features[[i, 1]] = y;
        labels[[i, 0]] = if x + y > 0.0 { 1.0 } else { 0.0 };
    }

    Dataset::new(features, labels).unwrap()
}

/// Hyperparameters giving 10 training batches per epoch on a single worker, overridden by
/// the fields of `overrides`.
pub fn params(overrides: Value) -> Params {
    let mut raw = json!({
        "learning_rate": 0.5,
        "batch_size": 4,
        "num_epochs": 3,
        "save_summary_steps": 1,
        "optimizer": "sgd",
        "seed": 7,
    });

    if let (Some(raw), Value::Object(overrides)) = (raw.as_object_mut(), overrides) {
        raw.extend(overrides);
    }

    Params::from_json(&raw.to_string(), "test params").unwrap()
}

pub fn build_orchestrator(ctx: DistributedContext, params: &Params, dir: &Path) -> Orchestrator {
    let train = Arc::new(separable(TRAIN_SAMPLES, 0.0));
    let val = Arc::new(separable(VAL_SAMPLES, 0.5));

    let model = build_model(params, &ctx, 2);
    let optimizer = params.optimizer(model.params().len());
    let train_loader = train_loader(params, &ctx, train);
    let val_loader = eval_loader(params, &ctx, val);

    TrainingOrchestrator::new(ctx, model, optimizer, params, train_loader, val_loader, dir).unwrap()
}
