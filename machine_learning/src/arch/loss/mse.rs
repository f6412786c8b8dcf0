use ndarray::{Array2, ArrayView2};

use super::LossFn;
use crate::{MlErr, Result};

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl LossFn for Mse {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len().max(1) as f32)
    }

    fn check_labels(&self, labels: ArrayView2<f32>, outputs: usize) -> Result<()> {
        if labels.nrows() > 0 && labels.ncols() != outputs {
            return Err(MlErr::InvalidLabels(format!(
                "mse compares {outputs} output(s) against labels of {} value(s)",
                labels.ncols()
            )));
        }

        Ok(())
    }
}
