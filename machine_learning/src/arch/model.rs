use ndarray::{Array2, ArrayView2};

use crate::{Result, tensor::StateDict};

/// Whether a model is being fitted or only queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// A trainable model whose parameters and gradient live in two flat buffers of equal length.
pub trait Model {
    /// Switches between training and evaluation behaviour. In evaluation mode nothing needed
    /// for a backward pass is kept and `backward` fails.
    fn set_mode(&mut self, mode: Mode);

    /// Makes a forward pass through the model.
    ///
    /// # Arguments
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The model's output for each sample or an error if `x` doesn't fit the model.
    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>>;

    /// Accumulates into the gradient buffer the gradient of the loss with respect to the
    /// parameters, given the loss' derivative with respect to the last `forward` output.
    ///
    /// # Arguments
    /// * `d` - The derivative of the loss with respect to the model's output.
    fn backward(&mut self, d: ArrayView2<f32>) -> Result<()>;

    fn params(&self) -> &[f32];

    fn grad(&self) -> &[f32];

    /// Returns the parameters and the gradient buffer, both mutable.
    fn parts_mut(&mut self) -> (&mut [f32], &mut [f32]);

    fn zero_grad(&mut self) {
        self.parts_mut().1.fill(0.0);
    }

    /// Takes a snapshot of the model's parameters.
    fn state_dict(&self) -> StateDict;

    /// Overwrites the model's parameters with a snapshot taken by `state_dict`.
    ///
    /// # Returns
    /// An error if a tensor is missing or doesn't match the model's shapes, in which case the
    /// model is left untouched.
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn set_mode(&mut self, mode: Mode) {
        (**self).set_mode(mode)
    }

    fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        (**self).forward(x)
    }

    fn backward(&mut self, d: ArrayView2<f32>) -> Result<()> {
        (**self).backward(d)
    }

    fn params(&self) -> &[f32] {
        (**self).params()
    }

    fn grad(&self) -> &[f32] {
        (**self).grad()
    }

    fn parts_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (**self).parts_mut()
    }

    fn zero_grad(&mut self) {
        (**self).zero_grad()
    }

    fn state_dict(&self) -> StateDict {
        (**self).state_dict()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        (**self).load_state_dict(state)
    }
}
