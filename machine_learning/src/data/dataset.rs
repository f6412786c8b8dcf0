use std::{fs, path::Path};

use ndarray::{Array2, Axis};
use serde::Deserialize;

use crate::{MlErr, Result, arch::loss::LossFn};

/// A batch of samples, one per row of `inputs` and `labels`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub labels: Array2<f32>,
}

impl Batch {
    #[inline]
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Scalar(f32),
    Vector(Vec<f32>),
}

#[derive(Deserialize)]
struct RawDataset {
    features: Vec<Vec<f32>>,
    labels: Vec<RawLabel>,
}

/// An in-memory labeled dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Array2<f32>,
    labels: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `features` - One sample per row.
    /// * `labels` - The labels of each sample, one row per sample.
    ///
    /// # Returns
    /// The dataset or an error if the amount of rows differ.
    pub fn new(features: Array2<f32>, labels: Array2<f32>) -> Result<Self> {
        if features.nrows() != labels.nrows() {
            return Err(MlErr::SizeMismatch {
                what: "dataset labels",
                got: labels.nrows(),
                expected: features.nrows(),
            });
        }

        Ok(Self { features, labels })
    }

    /// Loads the `split` of the dataset stored under `dir`.
    ///
    /// The split is read from `<dir>/<split>.json`, an object with a `features` list of rows
    /// and a `labels` list holding either one number or one row per sample.
    ///
    /// # Arguments
    /// * `dir` - The dataset's directory.
    /// * `split` - The split's name, usually `train`, `val` or `test`.
    ///
    /// # Returns
    /// The dataset or an error describing what's wrong with the file.
    pub fn load(dir: &Path, split: &str) -> Result<Self> {
        let path = dir.join(format!("{split}.json"));
        let err = |reason: String| MlErr::Dataset {
            path: path.clone(),
            reason,
        };

        let raw = fs::read(&path).map_err(|e| err(e.to_string()))?;
        let raw: RawDataset = serde_json::from_slice(&raw).map_err(|e| err(e.to_string()))?;

        let features = rows_to_array(raw.features).map_err(&err)?;
        let labels = raw
            .labels
            .into_iter()
            .map(|label| match label {
                RawLabel::Scalar(v) => vec![v],
                RawLabel::Vector(row) => row,
            })
            .collect();
        let labels = rows_to_array(labels).map_err(&err)?;

        Self::new(features, labels).map_err(|e| err(e.to_string()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the amount of features of each sample.
    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }

    /// Checks every label is a target `loss_fn` can score a model with `outputs` outputs on.
    pub fn check_labels<L: LossFn + ?Sized>(&self, loss_fn: &L, outputs: usize) -> Result<()> {
        loss_fn.check_labels(self.labels.view(), outputs)
    }

    /// Copies the samples at `indices`, in that order, into a batch.
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            inputs: self.features.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }
}

fn rows_to_array(rows: Vec<Vec<f32>>) -> std::result::Result<Array2<f32>, String> {
    let ncols = rows.first().map_or(0, Vec::len);
    let nrows = rows.len();

    if let Some(i) = rows.iter().position(|row| row.len() != ncols) {
        return Err(format!(
            "row {i} has {} values, expected {ncols}",
            rows[i].len()
        ));
    }

    let data = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), data).map_err(|e| e.to_string())
}
