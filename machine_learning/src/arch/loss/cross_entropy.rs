use ndarray::{Array2, ArrayView2};

use super::LossFn;
use crate::{MlErr, Result};

/// Probabilities below this are clamped before taking logarithms.
const EPSILON: f32 = 1e-7;

/// Cross entropy over raw scores (logits).
///
/// With several output columns the scores go through a softmax and `y` holds, in its first
/// column, the index of the expected class of each row. With a single output column the score
/// is the logit of the positive class of a binary problem and `y` holds 0 or 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    fn probabilities(y_pred: ArrayView2<f32>) -> Array2<f32> {
        let mut p = y_pred.to_owned();

        if p.ncols() == 1 {
            p.mapv_inplace(|z| 1.0 / (1.0 + (-z).exp()));
            return p;
        }

        for mut row in p.rows_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }

        p
    }
}

impl LossFn for CrossEntropy {
    fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        let n = y_pred.nrows();
        if n == 0 {
            return 0.0;
        }

        let p = Self::probabilities(y_pred);
        let labels = y.column(0);

        let total: f32 = if p.ncols() == 1 {
            p.column(0)
                .iter()
                .zip(labels)
                .map(|(&p, &y)| {
                    let p = p.clamp(EPSILON, 1.0 - EPSILON);
                    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                })
                .sum()
        } else {
            p.rows()
                .into_iter()
                .zip(labels)
                .map(|(row, &class)| {
                    let p = row.get(class as usize).copied().unwrap_or_default();
                    -p.max(EPSILON).ln()
                })
                .sum()
        };

        total / n as f32
    }

    fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        let n = y_pred.nrows().max(1) as f32;
        let mut d = Self::probabilities(y_pred);
        let labels = y.column(0);

        if d.ncols() == 1 {
            d.column_mut(0)
                .iter_mut()
                .zip(labels)
                .for_each(|(d, &y)| *d -= y);
        } else {
            for (mut row, &class) in d.rows_mut().into_iter().zip(labels) {
                if let Some(v) = row.get_mut(class as usize) {
                    *v -= 1.0;
                }
            }
        }

        d / n
    }

    fn check_labels(&self, labels: ArrayView2<f32>, outputs: usize) -> Result<()> {
        if labels.nrows() == 0 {
            return Ok(());
        }

        if labels.ncols() != 1 {
            return Err(MlErr::InvalidLabels(format!(
                "cross entropy expects one class per label, got {} value(s)",
                labels.ncols()
            )));
        }

        let classes = if outputs == 1 { 2 } else { outputs };

        // NaN fails the fract check too.
        let bad = labels
            .column(0)
            .iter()
            .position(|&c| c < 0.0 || c.fract() != 0.0 || c >= classes as f32);

        match bad {
            Some(i) => Err(MlErr::InvalidLabels(format!(
                "label {i} is {}, expected a class in 0..{classes}",
                labels[[i, 0]]
            ))),
            None => Ok(()),
        }
    }
}
