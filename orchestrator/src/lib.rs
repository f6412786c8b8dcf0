mod app;
pub mod checkpoint;
pub mod configs;
pub mod error;
pub mod evaluation;
pub mod logging;
mod persist;
pub mod results;
pub mod tracker;
pub mod training;

pub use app::{build_context, build_model, eval_loader, run_evaluation, run_training, train_loader};
pub use checkpoint::{CheckpointRecord, CheckpointStore, CheckpointTag, Restored};
pub use error::{OrchestratorError, Result};
pub use tracker::BestScoreTracker;
pub use training::{EpochReport, Phase, TrainingOrchestrator, TrainingReport};
