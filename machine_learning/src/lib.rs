pub mod arch;
pub mod context;
pub mod data;
pub mod device;
pub mod error;
pub mod metrics;
pub mod optimization;
pub mod precision;
pub mod tensor;
pub mod training;

pub use context::DistributedContext;
pub use error::{MlErr, Result};
pub use precision::{DynamicScaling, LossScaler, PrecisionPolicy, StepOutcome};
pub use training::EpochRunner;
