use ndarray::{ShapeError, linalg, prelude::*};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{Mode, Model};
use crate::{
    MlErr, Result,
    tensor::{StateDict, Tensor, expect_tensor},
};

const WEIGHT: &str = "weight";
const BIAS: &str = "bias";

/// A fully connected layer without activation, `y = x·W + b`.
///
/// The parameters are laid out as the weights (row-major, `inputs × outputs`) followed by
/// the biases, the gradient buffer uses the same layout.
#[derive(Debug, Clone)]
pub struct Linear {
    dim: (usize, usize),
    params: Box<[f32]>,
    grad: Box<[f32]>,
    mode: Mode,

    // Forward metadata, only kept while training.
    x: Option<Array2<f32>>,
}

impl Linear {
    /// Creates a new `Linear` with parameters drawn uniformly from `±1/sqrt(inputs)`.
    ///
    /// # Arguments
    /// * `inputs` - The amount of features of each sample.
    /// * `outputs` - The amount of values produced for each sample.
    /// * `seed` - Seed for the initial parameters, equal seeds give equal models.
    ///
    /// # Returns
    /// A new `Linear` in training mode.
    pub fn new(inputs: usize, outputs: usize, seed: u64) -> Self {
        let size = (inputs + 1) * outputs;
        let k = 1.0 / (inputs.max(1) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);

        let params = (0..size).map(|_| rng.random_range(-k..=k)).collect();

        Self {
            dim: (inputs, outputs),
            params,
            grad: vec![0.0; size].into_boxed_slice(),
            mode: Mode::Train,
            x: None,
        }
    }

    /// Returns the amount of parameters of this model.
    pub fn size(&self) -> usize {
        self.params.len()
    }

    fn w_size(&self) -> usize {
        self.dim.0 * self.dim.1
    }
}

fn layout_err(len: usize, dim: (usize, usize)) -> impl FnOnce(ShapeError) -> MlErr {
    move |_| MlErr::SizeMismatch {
        what: "linear weights",
        got: len,
        expected: dim.0 * dim.1,
    }
}

impl Model for Linear {
    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;

        if mode == Mode::Eval {
            self.x = None;
        }
    }

    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "input features",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w_raw, b_raw) = self.params.split_at(self.w_size());
        let w = ArrayView2::from_shape(self.dim, w_raw).map_err(layout_err(w_raw.len(), self.dim))?;
        let b = ArrayView1::from(b_raw);

        let z = x.dot(&w) + &b;

        if self.mode == Mode::Train {
            self.x = Some(x.to_owned());
        }

        Ok(z)
    }

    fn backward(&mut self, d: ArrayView2<f32>) -> Result<()> {
        let w_size = self.w_size();
        let x = self.x.as_ref().ok_or(MlErr::GradientsDisabled)?;

        if d.dim() != (x.nrows(), self.dim.1) {
            return Err(MlErr::SizeMismatch {
                what: "output gradient",
                got: d.len(),
                expected: x.nrows() * self.dim.1,
            });
        }

        let (dw_raw, db_raw) = self.grad.split_at_mut(w_size);
        let err = layout_err(dw_raw.len(), self.dim);
        let mut dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(err)?;
        let mut db = ArrayViewMut1::from(db_raw);

        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        Ok(())
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn grad(&self) -> &[f32] {
        &self.grad
    }

    fn parts_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.params, &mut self.grad)
    }

    fn state_dict(&self) -> StateDict {
        let (w, b) = self.params.split_at(self.w_size());

        let mut state = StateDict::new();
        if let Ok(w) = ArrayView2::from_shape(self.dim, w) {
            state.insert(WEIGHT.to_string(), Tensor::matrix(w));
        }
        state.insert(BIAS.to_string(), Tensor::vector(b));
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let w = expect_tensor(state, WEIGHT, &[self.dim.0, self.dim.1])?;
        let b = expect_tensor(state, BIAS, &[self.dim.1])?;

        let (w_dst, b_dst) = self.params.split_at_mut(self.w_size());
        w_dst.copy_from_slice(w);
        b_dst.copy_from_slice(b);
        Ok(())
    }
}
