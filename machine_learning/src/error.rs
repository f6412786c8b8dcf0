use std::{
    error::Error,
    fmt::{self, Display},
    path::PathBuf,
};

use comms::CollectiveErr;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    MissingTensor {
        name: String,
    },
    MetricKeysMismatch {
        got: Vec<String>,
        expected: Vec<String>,
    },
    UnknownMetric(String),
    ReservedMetric(String),
    InvalidLabels(String),
    GradientsDisabled,
    EmptyDataset {
        pass: &'static str,
    },
    Dataset {
        path: PathBuf,
        reason: String,
    },
    Collective(CollectiveErr),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                name,
                got,
                expected,
            } => write!(
                f,
                "Tensor {name} has shape {got:?} but the target expects {expected:?}"
            ),
            MlErr::MissingTensor { name } => write!(f, "Tensor {name} is missing from the state"),
            MlErr::MetricKeysMismatch { got, expected } => write!(
                f,
                "Metric summaries must share their keys, got {got:?} and expected {expected:?}"
            ),
            MlErr::UnknownMetric(name) => write!(f, "Unknown metric {name}"),
            MlErr::ReservedMetric(name) => {
                write!(f, "The metric name {name} is reserved for the loss")
            }
            MlErr::InvalidLabels(reason) => write!(f, "Labels don't fit the loss: {reason}"),
            MlErr::GradientsDisabled => {
                write!(f, "Tried to compute gradients with the model in evaluation mode")
            }
            MlErr::EmptyDataset { pass } => write!(
                f,
                "The {pass} pass went over zero batches, its metrics are undefined"
            ),
            MlErr::Dataset { path, reason } => {
                write!(f, "Failed to load dataset {}: {reason}", path.display())
            }
            MlErr::Collective(e) => write!(f, "{e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Collective(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CollectiveErr> for MlErr {
    fn from(value: CollectiveErr) -> Self {
        Self::Collective(value)
    }
}
