mod error;
mod local;
mod solo;
mod star;
mod tcp;

use std::sync::Arc;

use parking_lot::Mutex;

pub use error::{CollectiveErr, Result};
pub use local::{LocalCollective, local_group};
pub use solo::Solo;
pub use star::StarCollective;
pub use tcp::TcpCollective;

/// A group of workers that can combine values with all-reduce semantics.
///
/// Every member of the group must issue the same reductions, with the same
/// lengths and in the same order. A member that falls behind stalls the rest
/// until the transport's timeout expires.
pub trait Collective: Send {
    /// Returns this member's rank inside the group.
    fn rank(&self) -> usize;

    /// Returns the amount of members in the group.
    fn world_size(&self) -> usize;

    /// Replaces every element of `values` with its arithmetic mean across the group.
    ///
    /// After a successful call every member holds bit-identical values.
    ///
    /// # Arguments
    /// * `values` - This member's contribution, overwritten with the result.
    ///
    /// # Errors
    /// A `CollectiveErr` if any member did not take part in the reduction.
    fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()>;

    /// Blocks until every member of the group reaches this point.
    fn barrier(&mut self) -> Result<()> {
        self.all_reduce_mean(&mut [])
    }
}

impl<C: Collective + ?Sized> Collective for Box<C> {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn world_size(&self) -> usize {
        (**self).world_size()
    }

    fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()> {
        (**self).all_reduce_mean(values)
    }
}

/// A collective handle that several components of the same worker can hold.
///
/// Clones share the underlying connections and sequence counter, so calls
/// from the different holders are ordered by the single thread driving them.
#[derive(Clone)]
pub struct SharedCollective {
    inner: Arc<Mutex<Box<dyn Collective>>>,
    rank: usize,
    world_size: usize,
}

impl SharedCollective {
    /// Wraps `collective` so it can be shared.
    pub fn new<C: Collective + 'static>(collective: C) -> Self {
        let rank = collective.rank();
        let world_size = collective.world_size();

        Self {
            inner: Arc::new(Mutex::new(Box::new(collective))),
            rank,
            world_size,
        }
    }

    /// A shared handle over a single-member group.
    pub fn solo() -> Self {
        Self::new(Solo)
    }
}

impl Collective for SharedCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_mean(&mut self, values: &mut [f32]) -> Result<()> {
        self.inner.lock().all_reduce_mean(values)
    }
}
