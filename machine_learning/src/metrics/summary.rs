use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The metrics of a single batch, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSummary(BTreeMap<String, f32>);

impl MetricSummary {
    pub fn insert(&mut self, name: impl Into<String>, value: f32) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the metrics sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterates the values sorted by their metric's name.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.0.values_mut()
    }
}

impl FromIterator<(String, f32)> for MetricSummary {
    fn from_iter<T: IntoIterator<Item = (String, f32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The metrics of a whole pass: the mean of each metric over the pass' summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochResult(BTreeMap<String, f32>);

impl EpochResult {
    /// Averages every metric over `summaries`.
    ///
    /// # Arguments
    /// * `summaries` - The summaries collected during the pass.
    /// * `pass` - The pass' name, for errors.
    ///
    /// # Returns
    /// The averaged metrics, or an error if there's nothing to average or the summaries don't
    /// share the same metrics.
    pub fn mean(summaries: &[MetricSummary], pass: &'static str) -> Result<Self> {
        let Some((first, rest)) = summaries.split_first() else {
            return Err(MlErr::EmptyDataset { pass });
        };

        let mut sums: BTreeMap<String, f64> =
            first.iter().map(|(k, v)| (k.to_string(), v as f64)).collect();

        for summary in rest {
            if !summary.keys().eq(first.keys()) {
                return Err(MlErr::MetricKeysMismatch {
                    got: summary.keys().map(str::to_string).collect(),
                    expected: first.keys().map(str::to_string).collect(),
                });
            }

            for ((_, sum), (_, v)) in sums.iter_mut().zip(summary.iter()) {
                *sum += v as f64;
            }
        }

        let n = summaries.len() as f64;
        Ok(Self(
            sums.into_iter()
                .map(|(k, sum)| (k, (sum / n) as f32))
                .collect(),
        ))
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl Display for EpochResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ; ")?;
            }

            write!(f, "{name}: {value:05.3}")?;
        }

        Ok(())
    }
}

/// Keeps the running mean of a quantity, like the loss along an epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningAverage {
    steps: usize,
    total: f32,
}

impl RunningAverage {
    pub fn update(&mut self, value: f32) {
        self.total += value;
        self.steps += 1;
    }

    /// Returns the mean of the values seen so far, zero before the first one.
    pub fn get(&self) -> f32 {
        if self.steps == 0 {
            return 0.0;
        }

        self.total / self.steps as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(pairs: &[(&str, f32)]) -> MetricSummary {
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn mean_averages_each_metric() {
        let summaries = [
            summary(&[("accuracy", 0.5), ("loss", 1.0)]),
            summary(&[("accuracy", 1.0), ("loss", 2.0)]),
            summary(&[("accuracy", 0.0), ("loss", 6.0)]),
        ];

        let result = EpochResult::mean(&summaries, "train").unwrap();
        assert_eq!(result.get("accuracy"), Some(0.5));
        assert_eq!(result.get("loss"), Some(3.0));
    }

    #[test]
    fn mean_of_nothing_is_an_error() {
        assert!(matches!(
            EpochResult::mean(&[], "eval"),
            Err(MlErr::EmptyDataset { pass: "eval" })
        ));
    }

    #[test]
    fn summaries_must_share_their_keys() {
        let summaries = [summary(&[("loss", 1.0)]), summary(&[("acc", 1.0)])];

        assert!(matches!(
            EpochResult::mean(&summaries, "train"),
            Err(MlErr::MetricKeysMismatch { .. })
        ));
    }

    #[test]
    fn display_and_json_forms() {
        let result = EpochResult::mean(&[summary(&[("accuracy", 0.875), ("loss", 12.25)])], "eval")
            .unwrap();

        assert_eq!(result.to_string(), "accuracy: 0.875 ; loss: 12.250");

        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"accuracy":0.875,"loss":12.25}"#);
        assert_eq!(serde_json::from_str::<EpochResult>(&json).unwrap(), result);
    }

    #[test]
    fn running_average() {
        let mut avg = RunningAverage::default();
        assert_eq!(avg.get(), 0.0);

        avg.update(1.0);
        avg.update(2.0);
        assert_eq!(avg.get(), 1.5);
    }
}
