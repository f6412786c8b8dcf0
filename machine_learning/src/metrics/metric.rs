use std::collections::BTreeMap;

use ndarray::{ArrayView1, ArrayView2};

use super::MetricSummary;
use crate::{MlErr, Result};

/// The key every summary reserves for the loss value.
pub const LOSS_KEY: &str = "loss";

/// Scores a batch of model outputs against the expected labels.
pub trait Metric: Send + Sync {
    fn score(&self, output: ArrayView2<f32>, labels: ArrayView2<f32>) -> f32;
}

impl<F> Metric for F
where
    F: Fn(ArrayView2<f32>, ArrayView2<f32>) -> f32 + Send + Sync,
{
    fn score(&self, output: ArrayView2<f32>, labels: ArrayView2<f32>) -> f32 {
        self(output, labels)
    }
}

/// The fraction of rows whose predicted class matches the label in the first column.
///
/// With several output columns the prediction is the highest scoring one. A single output
/// column holds a logit, predicting class 1 when positive.
pub fn accuracy(output: ArrayView2<f32>, labels: ArrayView2<f32>) -> f32 {
    let n = output.nrows();
    if n == 0 {
        return 0.0;
    }

    let hits = output
        .rows()
        .into_iter()
        .zip(labels.column(0))
        .filter(|(row, label)| predicted_class(*row) == **label as usize)
        .count();

    hits as f32 / n as f32
}

fn predicted_class(row: ArrayView1<f32>) -> usize {
    if row.len() == 1 {
        return usize::from(row[0] > 0.0);
    }

    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 { (i, v) } else { best }
        })
        .0
}

/// The named set of metrics computed on every summarized batch.
#[derive(Default)]
pub struct Metrics {
    metrics: BTreeMap<String, Box<dyn Metric>>,
}

impl Metrics {
    /// Creates an empty set, summaries then only hold the loss.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `metric` under `name`, replacing any previous metric with that name.
    ///
    /// # Returns
    /// The extended set or an error if `name` is the reserved loss key.
    pub fn with<M>(mut self, name: impl Into<String>, metric: M) -> Result<Self>
    where
        M: Metric + 'static,
    {
        let name = name.into();

        if name == LOSS_KEY {
            return Err(MlErr::ReservedMetric(name));
        }

        self.metrics.insert(name, Box::new(metric));
        Ok(self)
    }

    /// Builds the set from the names of built-in metrics.
    ///
    /// # Arguments
    /// * `names` - Currently only `accuracy` is known.
    ///
    /// # Returns
    /// The set or an error naming the first unknown metric.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::new(), |metrics, name| {
            match name.as_ref() {
                "accuracy" => metrics.with("accuracy", accuracy),
                other => Err(MlErr::UnknownMetric(other.to_string())),
            }
        })
    }

    /// Returns the keys every summary produced by this set holds, the loss included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(LOSS_KEY))
    }

    /// Scores one batch with every metric of the set.
    ///
    /// # Arguments
    /// * `output` - The model's output for the batch.
    /// * `labels` - The expected labels.
    /// * `loss` - The batch's loss, stored under `LOSS_KEY`.
    ///
    /// # Returns
    /// The batch's summary.
    pub fn summarize(
        &self,
        output: ArrayView2<f32>,
        labels: ArrayView2<f32>,
        loss: f32,
    ) -> MetricSummary {
        self.metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.score(output, labels)))
            .chain(std::iter::once((LOSS_KEY.to_string(), loss)))
            .collect()
    }
}
