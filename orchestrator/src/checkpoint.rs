use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use log::info;
use machine_learning::{
    arch::Model,
    optimization::Optimizer,
    tensor::{StateDict, Tensor},
};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{OrchestratorError, Result, persist};

const MODEL_PREFIX: &str = "model";
const OPTIMIZER_PREFIX: &str = "optimizer";
const EPOCH_KEY: &str = "epoch";

/// The two checkpoints kept in a model directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum CheckpointTag {
    /// Overwritten at the end of every epoch.
    Last,
    /// Overwritten only when the validation score reaches a new best.
    Best,
}

impl CheckpointTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointTag::Last => "last",
            CheckpointTag::Best => "best",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.safetensors", self.as_str())
    }
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to resume training.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    /// The amount of completed epochs, which is also the index of the next one.
    pub epoch: usize,
    pub model: StateDict,
    pub optimizer: StateDict,
}

impl CheckpointRecord {
    /// Snapshots the trainable state after `epoch` epochs.
    pub fn capture<M, O>(epoch: usize, model: &M, optimizer: &O) -> Self
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        Self {
            epoch,
            model: model.state_dict(),
            optimizer: optimizer.state_dict(),
        }
    }
}

/// The outcome of looking for a checkpoint.
#[derive(Debug)]
pub enum Restored {
    Found(CheckpointRecord),
    NotFound(PathBuf),
}

/// Persists checkpoints as safetensors files inside a model directory.
///
/// Model tensors are stored as `model.<name>`, optimizer tensors as `optimizer.<name>` and
/// the epoch as metadata. Only the leader of a group may save.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns where the checkpoint tagged `tag` lives.
    pub fn path(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(tag.file_name())
    }

    /// Writes `record` as the last checkpoint and, if `is_best`, as the best one too.
    ///
    /// # Arguments
    /// * `record` - The state to persist.
    /// * `is_best` - Whether `record` scored a new best.
    ///
    /// # Returns
    /// An error if the record can't be encoded or written, in which case previously saved
    /// checkpoints are left intact.
    pub fn save(&self, record: &CheckpointRecord, is_best: bool) -> Result<()> {
        let last = self.path(CheckpointTag::Last);
        let bytes = encode(record).map_err(|e| OrchestratorError::CheckpointFormat {
            path: last.clone(),
            reason: e.to_string(),
        })?;

        persist::atomic_write(&last, &bytes)?;
        info!(epoch = record.epoch; "saved checkpoint to {}", last.display());

        if is_best {
            let best = self.path(CheckpointTag::Best);
            persist::atomic_write(&best, &bytes)?;
            info!(epoch = record.epoch; "saved checkpoint to {}", best.display());
        }

        Ok(())
    }

    /// Reads the checkpoint at `path`.
    ///
    /// # Returns
    /// The record, `Restored::NotFound` if there's no file, or a `CheckpointFormat` error if
    /// the file isn't a checkpoint.
    pub fn read(path: &Path) -> Result<Restored> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Restored::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        decode(&bytes)
            .map(Restored::Found)
            .map_err(|reason| OrchestratorError::CheckpointFormat {
                path: path.to_path_buf(),
                reason,
            })
    }

    /// Restores the checkpoint at `path` into `model` and, if given, `optimizer`.
    ///
    /// # Arguments
    /// * `path` - The checkpoint file.
    /// * `model` - Receives the stored parameters.
    /// * `optimizer` - Receives the stored optimizer state, evaluation runs leave it out.
    ///
    /// # Returns
    /// The stored epoch, `CheckpointNotFound` if there's no file, or `CheckpointFormat` if
    /// the stored tensors don't fit the targets, which are then left as they were.
    pub fn load<M>(path: &Path, model: &mut M, optimizer: Option<&mut dyn Optimizer>) -> Result<usize>
    where
        M: Model + ?Sized,
    {
        let record = match Self::read(path)? {
            Restored::Found(record) => record,
            Restored::NotFound(path) => return Err(OrchestratorError::CheckpointNotFound { path }),
        };

        let format_err = |e: machine_learning::MlErr| OrchestratorError::CheckpointFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let previous = model.state_dict();
        model.load_state_dict(&record.model).map_err(format_err)?;

        if let Some(optimizer) = optimizer {
            if let Err(e) = optimizer.load_state_dict(&record.optimizer) {
                // load_state_dict only writes once the whole state fits.
                model.load_state_dict(&previous).map_err(format_err)?;
                return Err(format_err(e));
            }
        }

        info!(epoch = record.epoch; "restored checkpoint {}", path.display());
        Ok(record.epoch)
    }
}

fn encode(record: &CheckpointRecord) -> std::result::Result<Vec<u8>, safetensors::SafeTensorError> {
    let sections = [(MODEL_PREFIX, &record.model), (OPTIMIZER_PREFIX, &record.optimizer)];

    let raw: Vec<(String, Vec<usize>, Vec<u8>)> = sections
        .into_iter()
        .flat_map(|(prefix, state)| {
            state.iter().map(move |(name, tensor)| {
                let bytes = tensor.data().iter().flat_map(|v| v.to_le_bytes()).collect();
                (format!("{prefix}.{name}"), tensor.shape().to_vec(), bytes)
            })
        })
        .collect();

    let views = raw
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.as_str(), view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let metadata = HashMap::from([(EPOCH_KEY.to_string(), record.epoch.to_string())]);
    safetensors::serialize(views, &Some(metadata))
}

fn decode(bytes: &[u8]) -> std::result::Result<CheckpointRecord, String> {
    let (_, metadata) = SafeTensors::read_metadata(bytes).map_err(|e| e.to_string())?;
    let epoch = metadata
        .metadata()
        .as_ref()
        .and_then(|metadata| metadata.get(EPOCH_KEY))
        .ok_or_else(|| format!("the {EPOCH_KEY} metadata entry is missing"))?;
    let epoch = epoch
        .parse()
        .map_err(|e| format!("invalid {EPOCH_KEY} {epoch:?}: {e}"))?;

    let tensors = SafeTensors::deserialize(bytes).map_err(|e| e.to_string())?;
    let mut record = CheckpointRecord {
        epoch,
        model: StateDict::new(),
        optimizer: StateDict::new(),
    };

    for (name, view) in tensors.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(format!("tensor {name} holds {:?}, expected F32", view.dtype()));
        }

        let data = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let tensor = Tensor::new(view.shape().to_vec(), data).map_err(|e| e.to_string())?;

        let (state, key) = match name.split_once('.') {
            Some((MODEL_PREFIX, key)) => (&mut record.model, key),
            Some((OPTIMIZER_PREFIX, key)) => (&mut record.optimizer, key),
            _ => return Err(format!("tensor {name} belongs to neither the model nor the optimizer")),
        };

        state.insert(key.to_string(), tensor);
    }

    Ok(record)
}
