use comms::{Collective, SharedCollective};

use super::MetricSummary;
use crate::Result;

/// Turns statistics computed by each worker into their mean across the group.
///
/// Every worker must issue the same reductions in the same order. With a single worker
/// reductions are the identity and nothing is communicated.
#[derive(Clone)]
pub struct MetricReducer {
    collective: SharedCollective,
}

impl MetricReducer {
    pub fn new(collective: SharedCollective) -> Self {
        Self { collective }
    }

    pub fn world_size(&self) -> usize {
        self.collective.world_size()
    }

    /// Returns the mean of `value` across the group, the same on every worker.
    pub fn reduce(&mut self, value: f32) -> Result<f32> {
        let mut values = [value];
        self.reduce_slice(&mut values)?;
        Ok(values[0])
    }

    /// Reduces every metric of `summary`, in a single exchange ordered by metric name.
    pub fn reduce_summary(&mut self, mut summary: MetricSummary) -> Result<MetricSummary> {
        let mut values: Vec<f32> = summary.iter().map(|(_, v)| v).collect();
        self.reduce_slice(&mut values)?;

        for (dst, v) in summary.values_mut().zip(values) {
            *dst = v;
        }

        Ok(summary)
    }

    /// Waits for every worker of the group to reach this point.
    pub fn barrier(&mut self) -> Result<()> {
        if self.world_size() > 1 {
            self.collective.barrier()?;
        }

        Ok(())
    }

    fn reduce_slice(&mut self, values: &mut [f32]) -> Result<()> {
        if self.world_size() > 1 {
            self.collective.all_reduce_mean(values)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use comms::local_group;

    use super::*;

    #[test]
    fn single_worker_reduction_is_the_identity() {
        let mut reducer = MetricReducer::new(SharedCollective::solo());
        assert_eq!(reducer.reduce(0.3).unwrap(), 0.3);
    }

    #[test]
    fn every_worker_gets_the_same_mean() {
        let group = local_group(4, Duration::from_secs(5)).unwrap();

        let handles: Vec<_> = group
            .into_iter()
            .enumerate()
            .map(|(rank, member)| {
                thread::spawn(move || {
                    let mut reducer = MetricReducer::new(SharedCollective::new(member));
                    let loss = reducer.reduce(rank as f32).unwrap();

                    let summary = [("accuracy".to_string(), rank as f32 / 4.0), ("loss".to_string(), 1.0)]
                        .into_iter()
                        .collect();
                    (loss, reducer.reduce_summary(summary).unwrap())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for (loss, summary) in &results {
            assert_eq!(*loss, 1.5);
            assert_eq!(summary.get("accuracy"), Some(0.375));
            assert_eq!(summary.get("loss"), Some(1.0));
        }
    }
}
