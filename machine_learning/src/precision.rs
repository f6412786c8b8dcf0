use half::f16;
use log::{debug, warn};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::{Result, arch::Model, optimization::Optimizer};

/// Tunables of dynamic loss scaling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicScaling {
    pub init_scale: f32,
    pub growth_factor: f32,
    pub backoff_factor: f32,
    pub growth_interval: usize,
    pub min_scale: f32,
}

impl Default for DynamicScaling {
    fn default() -> Self {
        Self {
            init_scale: 65536.0,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            min_scale: 1.0,
        }
    }
}

/// Keeps the factor the loss gradient is multiplied by under reduced precision.
///
/// The dynamic variant backs off whenever a step overflows and grows again after
/// `growth_interval` consecutive finite steps. The state lives only in memory.
#[derive(Debug, Clone)]
pub struct LossScaler {
    scale: f32,
    dynamic: Option<DynamicScaling>,
    good_steps: usize,
}

impl LossScaler {
    pub fn dynamic(config: DynamicScaling) -> Self {
        Self {
            scale: config.init_scale,
            dynamic: Some(config),
            good_steps: 0,
        }
    }

    /// A scaler that never changes its factor.
    pub fn fixed(scale: f32) -> Self {
        Self {
            scale,
            dynamic: None,
            good_steps: 0,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Adjusts the factor after a step.
    ///
    /// # Arguments
    /// * `finite` - Whether the step's gradient was finite.
    pub fn update(&mut self, finite: bool) {
        let Some(config) = self.dynamic else {
            return;
        };

        if !finite {
            self.scale = (self.scale * config.backoff_factor).max(config.min_scale);
            self.good_steps = 0;
            debug!(scale = self.scale; "loss scale backed off");
            return;
        }

        self.good_steps += 1;

        if self.good_steps >= config.growth_interval {
            let grown = self.scale * config.growth_factor;
            if grown.is_finite() {
                self.scale = grown;
            }

            self.good_steps = 0;
            debug!(scale = self.scale; "loss scale grown");
        }
    }
}

/// What happened to the optimizer step of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// The gradient wasn't finite, the parameters were left untouched.
    Skipped,
}

/// The arithmetic precision of backward passes.
#[derive(Debug, Clone)]
pub enum PrecisionPolicy {
    Full,
    /// Gradients are computed in half precision, protected from underflow by a loss scale.
    Mixed(LossScaler),
}

impl PrecisionPolicy {
    /// Returns the current loss scale, if any.
    pub fn scale(&self) -> Option<f32> {
        match self {
            PrecisionPolicy::Full => None,
            PrecisionPolicy::Mixed(scaler) => Some(scaler.scale()),
        }
    }

    /// Runs the backward pass for a batch and, unless the gradient overflowed, the optimizer
    /// step.
    ///
    /// Under mixed precision the loss gradient is scaled and both it and the resulting
    /// parameter gradient are rounded to half precision. A non finite gradient skips the step
    /// and backs the scale off, otherwise the gradient is unscaled before stepping.
    ///
    /// # Arguments
    /// * `d_loss` - The derivative of the unscaled loss with respect to the model's output.
    /// * `model` - The model, whose gradient buffer must have been cleared.
    /// * `optimizer` - Updates the model's parameters from its gradient.
    ///
    /// # Returns
    /// Whether the step was applied, or an error from the model, its group or the optimizer.
    pub fn scale_and_backward<M, O>(
        &mut self,
        d_loss: ArrayView2<f32>,
        model: &mut M,
        optimizer: &mut O,
    ) -> Result<StepOutcome>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
    {
        let scaler = match self {
            PrecisionPolicy::Full => {
                model.backward(d_loss)?;
                let (params, grad) = model.parts_mut();
                optimizer.update_params(grad, params)?;
                return Ok(StepOutcome::Applied);
            }
            PrecisionPolicy::Mixed(scaler) => scaler,
        };

        let scale = scaler.scale();
        let scaled = d_loss.mapv(|d| to_half(d * scale));
        model.backward(scaled.view())?;

        let (params, grad) = model.parts_mut();
        let mut finite = true;
        for g in grad.iter_mut() {
            *g = to_half(*g);
            finite &= g.is_finite();
        }

        scaler.update(finite);

        if !finite {
            warn!(scale = scale; "non finite gradient, skipping the optimizer step");
            return Ok(StepOutcome::Skipped);
        }

        let inv_scale = 1.0 / scale;
        grad.iter_mut().for_each(|g| *g *= inv_scale);
        optimizer.update_params(grad, params)?;

        Ok(StepOutcome::Applied)
    }
}

/// Rounds `x` to the nearest half precision value, overflowing to infinity.
fn to_half(x: f32) -> f32 {
    f16::from_f32(x).to_f32()
}
