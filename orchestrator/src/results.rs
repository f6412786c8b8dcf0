use std::path::{Path, PathBuf};

use machine_learning::metrics::EpochResult;

use crate::{Result, checkpoint::CheckpointTag, persist};

pub const VAL_BEST_FILE: &str = "metrics_val_best_weights.json";
pub const VAL_LAST_FILE: &str = "metrics_val_last_weights.json";

/// Returns the file a pure evaluation of the `tag` checkpoint writes its metrics to.
pub fn test_file(tag: CheckpointTag) -> String {
    format!("metrics_test_{tag}.json")
}

/// Writes `result` to `path` as a JSON object of metric names to values.
pub fn write(path: &Path, result: &EpochResult) -> Result<()> {
    persist::atomic_write_json(path, result)?;
    Ok(())
}

/// Reads metrics written by `write`, `None` if there's no file.
pub fn read(path: &Path) -> Result<Option<EpochResult>> {
    Ok(persist::load_json(path)?)
}

/// Paths of the validation results inside a model directory.
pub fn val_paths(model_dir: &Path) -> (PathBuf, PathBuf) {
    (model_dir.join(VAL_BEST_FILE), model_dir.join(VAL_LAST_FILE))
}
