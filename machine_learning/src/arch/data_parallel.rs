use comms::{Collective, SharedCollective};
use log::trace;
use ndarray::{Array2, ArrayView2};

use super::{Mode, Model};
use crate::{Result, tensor::StateDict};

/// Replicates a model across the workers of a group.
///
/// Every backward pass ends with the gradient averaged across the group, so replicas that
/// start from the same parameters and apply the same optimizer stay identical.
pub struct DataParallel<M: Model> {
    inner: M,
    collective: SharedCollective,
}

impl<M: Model> DataParallel<M> {
    /// Creates a new `DataParallel`.
    ///
    /// # Arguments
    /// * `inner` - This worker's replica.
    /// * `collective` - The group the replicas belong to.
    ///
    /// # Returns
    /// A new `DataParallel` instance.
    pub fn new(inner: M, collective: SharedCollective) -> Self {
        Self { inner, collective }
    }

    pub fn into_inner(self) -> M {
        self.inner
    }
}

impl<M: Model> Model for DataParallel<M> {
    fn set_mode(&mut self, mode: Mode) {
        self.inner.set_mode(mode);
    }

    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.inner.forward(x)
    }

    fn backward(&mut self, d: ArrayView2<f32>) -> Result<()> {
        self.inner.backward(d)?;

        if self.collective.world_size() > 1 {
            let (_, grad) = self.inner.parts_mut();
            self.collective.all_reduce_mean(grad)?;
            trace!("averaged {} gradient value(s)", grad.len());
        }

        Ok(())
    }

    fn params(&self) -> &[f32] {
        self.inner.params()
    }

    fn grad(&self) -> &[f32] {
        self.inner.grad()
    }

    fn parts_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        self.inner.parts_mut()
    }

    fn zero_grad(&mut self) {
        self.inner.zero_grad();
    }

    fn state_dict(&self) -> StateDict {
        self.inner.state_dict()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        self.inner.load_state_dict(state)
    }
}
