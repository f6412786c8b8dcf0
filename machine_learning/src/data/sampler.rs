use std::ops::Range;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Splits `total` samples among `num_workers` and returns the shard for `worker_id`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition).
pub fn shard_range(total: usize, worker_id: usize, num_workers: usize) -> Range<usize> {
    debug_assert!(worker_id < num_workers);

    let base = total / num_workers;
    let rem = total % num_workers;

    let start = worker_id * base + worker_id.min(rem);
    let extra = usize::from(worker_id < rem);
    let end = start + base + extra;

    start..end
}

/// Decides which samples of a dataset are visited during a pass, and in which order.
pub trait Sampler: Send {
    /// Returns the indices to visit in the next pass over a dataset of `len` samples.
    fn indices(&mut self, len: usize) -> Vec<usize>;

    /// Informs the sampler of the epoch about to start. Only samplers whose order is tied to
    /// the epoch number care.
    fn set_epoch(&mut self, _epoch: usize) {}
}

/// Visits every sample in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialSampler;

impl Sampler for SequentialSampler {
    fn indices(&mut self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

/// Visits every sample in a new random order on each pass.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for RandomSampler {
    fn indices(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<_> = (0..len).collect();
        indices.shuffle(&mut self.rng);
        indices
    }
}

/// Gives each worker of a group its own shard of the dataset.
///
/// The order is a function of the seed and the epoch only, so every worker computes the same
/// permutation and takes a disjoint slice of it. The permutation is padded by repeating its
/// head until it splits evenly, so every worker visits the same amount of samples and issues
/// the same amount of collective calls.
#[derive(Debug, Clone)]
pub struct DistributedSampler {
    rank: usize,
    world_size: usize,
    seed: u64,
    epoch: usize,
    shuffle: bool,
}

impl DistributedSampler {
    /// Creates a new `DistributedSampler`.
    ///
    /// # Arguments
    /// * `rank` - This worker's rank, in `0..world_size`.
    /// * `world_size` - The amount of workers in the group.
    /// * `seed` - Seed shared by the whole group.
    /// * `shuffle` - Whether to permute the samples, evaluation passes usually don't.
    ///
    /// # Returns
    /// A new `DistributedSampler` positioned at epoch 0.
    pub fn new(rank: usize, world_size: usize, seed: u64, shuffle: bool) -> Self {
        Self {
            rank,
            world_size: world_size.max(1),
            seed,
            epoch: 0,
            shuffle,
        }
    }

    /// Returns the amount of samples each worker visits for a dataset of `len` samples.
    pub fn num_samples(&self, len: usize) -> usize {
        len.div_ceil(self.world_size)
    }
}

impl Sampler for DistributedSampler {
    fn indices(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<_> = (0..len).collect();

        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch as u64));
            indices.shuffle(&mut rng);
        }

        let total = self.num_samples(len) * self.world_size;
        let padding: Vec<_> = indices.iter().cycle().take(total - len).copied().collect();
        indices.extend(padding);

        let range = shard_range(total, self.rank, self.world_size);
        indices.drain(range).collect()
    }

    fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn shard_range_balanced() {
        // total 10, workers 3 => sizes 4,3,3
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
    }

    fn shards(len: usize, world_size: usize, epoch: usize) -> Vec<Vec<usize>> {
        (0..world_size)
            .map(|rank| {
                let mut sampler = DistributedSampler::new(rank, world_size, 230, true);
                sampler.set_epoch(epoch);
                sampler.indices(len)
            })
            .collect()
    }

    #[test]
    fn shards_are_equal_sized_and_cover_the_dataset() {
        let shards = shards(10, 3, 0);

        assert!(shards.iter().all(|shard| shard.len() == 4));

        let seen: BTreeSet<_> = shards.iter().flatten().copied().collect();
        assert_eq!(seen, (0..10).collect());
    }

    #[test]
    fn shards_are_disjoint_when_the_dataset_splits_evenly() {
        let shards = shards(12, 3, 4);
        let seen: BTreeSet<_> = shards.iter().flatten().copied().collect();

        assert_eq!(seen.len(), 12);
    }

    #[test]
    fn the_permutation_follows_the_epoch() {
        assert_eq!(shards(50, 2, 1), shards(50, 2, 1));
        assert_ne!(shards(50, 2, 1), shards(50, 2, 2));
    }

    #[test]
    fn tiny_datasets_are_padded_for_every_worker() {
        let shards = shards(1, 3, 0);
        assert_eq!(shards, vec![vec![0], vec![0], vec![0]]);
    }

    #[test]
    fn empty_datasets_give_empty_shards() {
        assert!(shards(0, 2, 0).iter().all(Vec::is_empty));
    }

    #[test]
    fn random_sampler_reshuffles_each_pass() {
        let mut sampler = RandomSampler::new(7);
        let first = sampler.indices(64);
        let second = sampler.indices(64);

        assert_ne!(first, second);
        assert_eq!(RandomSampler::new(7).indices(64), first);
    }
}
