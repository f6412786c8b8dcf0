use super::{Optimizer, optimizer::check_sizes};
use crate::{
    Result,
    tensor::{StateDict, Tensor, expect_tensor},
};

const VELOCITY: &str = "velocity";

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_sizes(grad, params, self.velocity.len())?;

        let lr = self.learning_rate;
        let mu = self.momentum;

        params
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((p, g), v)| {
                *v = (mu * *v) + g;
                *p -= lr * *v;
            });

        Ok(())
    }

    fn state_dict(&self) -> StateDict {
        StateDict::from([(VELOCITY.to_string(), Tensor::vector(&self.velocity))])
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let velocity = expect_tensor(state, VELOCITY, &[self.velocity.len()])?;
        self.velocity.copy_from_slice(velocity);
        Ok(())
    }
}
