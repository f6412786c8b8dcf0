use std::{fmt, sync::Arc};

use comms::{Collective, SharedCollective};

use crate::{
    device::{Cpu, Device},
    metrics::MetricReducer,
};

/// What a worker knows about its place in the job. Built once at startup and never changed.
#[derive(Clone)]
pub struct DistributedContext {
    rank: Option<usize>,
    world_size: usize,
    is_leader: bool,
    device: Arc<dyn Device>,
    collective: SharedCollective,
}

impl DistributedContext {
    /// The context of a worker running on its own.
    pub fn local(device: Arc<dyn Device>) -> Self {
        Self {
            rank: None,
            world_size: 1,
            is_leader: true,
            device,
            collective: SharedCollective::solo(),
        }
    }

    /// The context of a member of a distributed group.
    ///
    /// # Arguments
    /// * `collective` - The group, which determines the rank and world size.
    /// * `device` - The device this worker computes on.
    pub fn distributed(collective: SharedCollective, device: Arc<dyn Device>) -> Self {
        let rank = collective.rank();

        Self {
            rank: Some(rank),
            world_size: collective.world_size(),
            is_leader: rank == 0,
            device,
            collective,
        }
    }

    /// Returns the rank inside the group, `None` when running on its own.
    pub fn rank(&self) -> Option<usize> {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Whether this worker owns the job's side effects: checkpoints, results and best score.
    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn is_distributed(&self) -> bool {
        self.rank.is_some()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn collective(&self) -> &SharedCollective {
        &self.collective
    }

    /// A metric reducer over this worker's group.
    pub fn reducer(&self) -> MetricReducer {
        MetricReducer::new(self.collective.clone())
    }
}

impl Default for DistributedContext {
    fn default() -> Self {
        Self::local(Arc::new(Cpu))
    }
}

impl fmt::Debug for DistributedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedContext")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .field("is_leader", &self.is_leader)
            .field("device", &self.device.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn a_local_worker_leads_itself() {
        let ctx = DistributedContext::default();
        assert_eq!(ctx.rank(), None);
        assert_eq!(ctx.world_size(), 1);
        assert!(ctx.is_leader());
        assert!(!ctx.is_distributed());
    }

    #[test]
    fn only_rank_zero_leads_a_group() {
        let group = comms::local_group(2, Duration::from_secs(1)).unwrap();
        let contexts: Vec<_> = group
            .into_iter()
            .map(|member| DistributedContext::distributed(SharedCollective::new(member), Arc::new(Cpu)))
            .collect();

        assert!(contexts[0].is_leader());
        assert!(!contexts[1].is_leader());
        assert_eq!(contexts[1].rank(), Some(1));
        assert!(contexts.iter().all(|ctx| ctx.is_distributed() && ctx.world_size() == 2));
    }
}
