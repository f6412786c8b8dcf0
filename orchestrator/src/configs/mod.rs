mod launch;
mod params;

pub use launch::{EvaluateArgs, Rendezvous, TrainArgs};
pub use params::{LossKind, LossScale, OptimizerKind, PARAMS_FILE, Params, ScaleMode};
