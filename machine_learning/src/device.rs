use std::fmt::Debug;

use crate::{Result, data::Batch};

/// Where a worker runs its computations.
///
/// Devices may queue work asynchronously, `synchronize` blocks until everything queued so far
/// has completed.
pub trait Device: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Moves a batch into the device's memory.
    fn transfer(&self, batch: Batch) -> Batch;

    /// Blocks until all queued work has completed.
    fn synchronize(&self) -> Result<()>;
}

/// The host processor. Work is executed eagerly, so there's nothing to move or wait for.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cpu;

impl Device for Cpu {
    fn name(&self) -> &str {
        "cpu"
    }

    fn transfer(&self, batch: Batch) -> Batch {
        batch
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
