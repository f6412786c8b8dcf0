use std::{fmt, io, path::PathBuf};

use comms::CollectiveErr;
use machine_learning::MlErr;

/// The result type used across the orchestrator.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can stop a training or evaluation run.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Missing or invalid hyperparameters or launch settings, caught before any epoch runs.
    Config { origin: String, reason: String },
    /// There's no checkpoint at the requested path.
    CheckpointNotFound { path: PathBuf },
    /// The checkpoint is unreadable or doesn't fit the model it's loaded into.
    CheckpointFormat { path: PathBuf, reason: String },
    /// The workers of a group restored checkpoints of different epochs.
    ResumeMismatch { start_epoch: usize, group_mean: f32 },
    /// The training core failed, a lost collective included.
    Ml(MlErr),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl OrchestratorError {
    pub(crate) fn config(origin: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Config {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { origin, reason } => write!(f, "invalid config in {origin}: {reason}"),
            Self::CheckpointNotFound { path } => {
                write!(f, "checkpoint doesn't exist: {}", path.display())
            }
            Self::CheckpointFormat { path, reason } => {
                write!(f, "unusable checkpoint {}: {reason}", path.display())
            }
            Self::ResumeMismatch {
                start_epoch,
                group_mean,
            } => write!(
                f,
                "workers resume at different epochs, this one at {start_epoch} and the group \
                 at {group_mean} on average"
            ),
            Self::Ml(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<CollectiveErr> for OrchestratorError {
    fn from(e: CollectiveErr) -> Self {
        Self::Ml(MlErr::Collective(e))
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
