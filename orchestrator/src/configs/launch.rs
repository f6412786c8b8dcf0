use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
};

use clap::Parser;

use crate::{OrchestratorError, Result, checkpoint::CheckpointTag};

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_MASTER_PORT: u16 = 29500;

/// Trains the model described by a model directory.
#[derive(Parser, Debug, Clone)]
#[command(name = "train", version, about, long_about = None)]
pub struct TrainArgs {
    /// Directory holding the train, val and test splits.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding params.json, receives checkpoints, metrics and logs.
    #[arg(long, default_value = "experiments/base_model")]
    pub model_dir: PathBuf,

    /// Checkpoint of the model directory to resume from.
    #[arg(long, value_enum)]
    pub restore_file: Option<CheckpointTag>,

    /// Rank assigned by a distributed launcher, -1 trains on a single worker.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub local_rank: i64,
}

impl TrainArgs {
    /// Returns the launcher's rank, `None` when launched on its own.
    pub fn rank(&self) -> Option<usize> {
        usize::try_from(self.local_rank).ok()
    }
}

/// Evaluates a checkpoint of a model directory on the test split.
#[derive(Parser, Debug, Clone)]
#[command(name = "evaluate", version, about, long_about = None)]
pub struct EvaluateArgs {
    /// Directory holding the test split.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding params.json and the checkpoints.
    #[arg(long, default_value = "experiments/base_model")]
    pub model_dir: PathBuf,

    /// Checkpoint of the model directory to evaluate.
    #[arg(long, value_enum, default_value = "best")]
    pub restore_file: CheckpointTag,

    /// Rank assigned by a distributed launcher, -1 evaluates on a single worker.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub local_rank: i64,
}

impl EvaluateArgs {
    /// Returns the launcher's rank, `None` when launched on its own.
    pub fn rank(&self) -> Option<usize> {
        usize::try_from(self.local_rank).ok()
    }
}

/// Where the members of a distributed group meet, as set by the launcher's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendezvous {
    pub addr: SocketAddr,
    pub world_size: usize,
}

impl Rendezvous {
    /// Reads `WORLD_SIZE`, `MASTER_ADDR` and `MASTER_PORT` from the environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the rendezvous settings through `lookup`.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of a variable, if set.
    ///
    /// # Returns
    /// The settings or a `Config` error naming the offending variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let world_size = lookup("WORLD_SIZE")
            .ok_or_else(|| OrchestratorError::config("WORLD_SIZE", "not set"))?;
        let world_size = match world_size.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                return Err(OrchestratorError::config(
                    "WORLD_SIZE",
                    format!("expected a positive integer, got {world_size:?}"),
                ));
            }
        };

        let host = lookup("MASTER_ADDR").unwrap_or_else(|| DEFAULT_MASTER_ADDR.to_string());
        let port = match lookup("MASTER_PORT") {
            Some(port) => port.trim().parse::<u16>().map_err(|e| {
                OrchestratorError::config("MASTER_PORT", format!("{port:?} isn't a port ({e})"))
            })?,
            None => DEFAULT_MASTER_PORT,
        };

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| OrchestratorError::config("MASTER_ADDR", format!("{host}: {e}")))?
            .next()
            .ok_or_else(|| {
                OrchestratorError::config("MASTER_ADDR", format!("{host} resolves to nothing"))
            })?;

        Ok(Self { addr, world_size })
    }
}
