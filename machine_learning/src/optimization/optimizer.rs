use crate::{Result, tensor::StateDict};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of parameters using the gradient.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad`, `params` or the optimizer's state.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// Takes a snapshot of the optimizer's internal state, empty for stateless optimizers.
    fn state_dict(&self) -> StateDict {
        StateDict::new()
    }

    /// Restores a snapshot taken by `state_dict`.
    fn load_state_dict(&mut self, _state: &StateDict) -> Result<()> {
        Ok(())
    }
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        (**self).update_params(grad, params)
    }

    fn state_dict(&self) -> StateDict {
        (**self).state_dict()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        (**self).load_state_dict(state)
    }
}

/// Checks `grad`, `params` and any per-parameter state buffer share their length.
pub(super) fn check_sizes(grad: &[f32], params: &[f32], state: usize) -> Result<()> {
    use crate::MlErr;

    if grad.len() != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }

    if state != params.len() {
        return Err(MlErr::SizeMismatch {
            what: "optimizer state",
            got: state,
            expected: params.len(),
        });
    }

    Ok(())
}
