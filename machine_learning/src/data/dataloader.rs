use std::{num::NonZeroUsize, sync::Arc};

use super::{Batch, Dataset, Sampler};

/// Produces the batches of one pass over a dataset, in the order given by a sampler.
pub struct DataLoader {
    dataset: Arc<Dataset>,
    sampler: Box<dyn Sampler>,
    batch_size: NonZeroUsize,
}

impl DataLoader {
    /// Creates a new `DataLoader`.
    ///
    /// # Arguments
    /// * `dataset` - The samples to go over.
    /// * `sampler` - Decides which samples each pass visits and in which order.
    /// * `batch_size` - The maximum amount of samples per batch, the last one may be smaller.
    ///
    /// # Returns
    /// A new `DataLoader` instance.
    pub fn new<S>(dataset: Arc<Dataset>, sampler: S, batch_size: NonZeroUsize) -> Self
    where
        S: Sampler + 'static,
    {
        Self {
            dataset,
            sampler: Box::new(sampler),
            batch_size,
        }
    }

    /// Forwards the epoch about to start to the sampler.
    pub fn set_epoch(&mut self, epoch: usize) {
        self.sampler.set_epoch(epoch);
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Starts a new pass, batches are copied out of the dataset as they're requested.
    pub fn batches(&mut self) -> Batches<'_> {
        let indices = self.sampler.indices(self.dataset.len());

        Batches {
            dataset: &self.dataset,
            indices,
            cursor: 0,
            batch_size: self.batch_size.get(),
        }
    }
}

/// The lazy iterator over the batches of a single pass.
pub struct Batches<'a> {
    dataset: &'a Dataset,
    indices: Vec<usize>,
    cursor: usize,
    batch_size: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.indices.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let batch = self.dataset.batch(&self.indices[self.cursor..end]);
        self.cursor = end;

        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.indices.len() - self.cursor).div_ceil(self.batch_size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Batches<'_> {}
