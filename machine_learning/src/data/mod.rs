mod dataloader;
mod dataset;
mod sampler;

pub use dataloader::{Batches, DataLoader};
pub use dataset::{Batch, Dataset};
pub use sampler::{DistributedSampler, RandomSampler, Sampler, SequentialSampler, shard_range};
