use ndarray::{Array2, ArrayView2};

use crate::Result;

/// Measures how far a model's output is from the expected one.
///
/// `loss` and `loss_prime` assume labels that passed `check_labels`.
pub trait LossFn {
    /// Returns the loss averaged over the batch.
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32;

    /// Returns the derivative of `loss` with respect to each element of `y_pred`.
    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32>;

    /// Checks every row of `labels` is a target this loss can compare against.
    ///
    /// # Arguments
    /// * `labels` - One label per row.
    /// * `outputs` - The amount of columns of the model's output.
    ///
    /// # Returns
    /// An `InvalidLabels` error describing the first label that doesn't fit.
    fn check_labels(&self, _labels: ArrayView2<f32>, _outputs: usize) -> Result<()> {
        Ok(())
    }
}

impl<L: LossFn + ?Sized> LossFn for Box<L> {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (**self).loss(y_pred, y)
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (**self).loss_prime(y_pred, y)
    }

    fn check_labels(&self, labels: ArrayView2<f32>, outputs: usize) -> Result<()> {
        (**self).check_labels(labels, outputs)
    }
}
