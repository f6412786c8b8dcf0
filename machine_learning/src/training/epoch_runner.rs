use std::{num::NonZeroUsize, sync::Arc};

use log::{debug, warn};

use crate::{
    Result,
    arch::{Mode, Model, loss::LossFn},
    context::DistributedContext,
    data::Batch,
    device::Device,
    metrics::{EpochResult, MetricReducer, MetricSummary, Metrics, RunningAverage},
    optimization::Optimizer,
    precision::{PrecisionPolicy, StepOutcome},
};

/// Runs the training and evaluation passes of an epoch and summarizes their metrics.
///
/// Every worker of a group must run the same passes over the same amount of batches, as each
/// summarized batch is reduced across the group.
pub struct EpochRunner {
    metrics: Metrics,
    save_summary_steps: NonZeroUsize,
    device: Arc<dyn Device>,
    reducer: MetricReducer,
    distributed: bool,
}

impl EpochRunner {
    /// Creates a new `EpochRunner`.
    ///
    /// # Arguments
    /// * `ctx` - The worker's context.
    /// * `metrics` - The metrics computed for each summarized batch, besides the loss.
    /// * `save_summary_steps` - While training, only one every `save_summary_steps` batches
    ///   is summarized.
    ///
    /// # Returns
    /// A new `EpochRunner` instance.
    pub fn new(ctx: &DistributedContext, metrics: Metrics, save_summary_steps: NonZeroUsize) -> Self {
        Self {
            metrics,
            save_summary_steps,
            device: ctx.device().clone(),
            reducer: ctx.reducer(),
            distributed: ctx.is_distributed(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Trains `model` over one pass of `batches`.
    ///
    /// # Arguments
    /// * `model` - The model to fit.
    /// * `optimizer` - Updates the model's parameters after each backward pass.
    /// * `loss_fn` - The loss to minimize.
    /// * `precision` - Runs the backward pass and the optimizer step.
    /// * `batches` - The pass' batches, each consumed once.
    ///
    /// # Returns
    /// The mean of the summarized batches' metrics, or an error if no batch was summarized,
    /// the model failed or the group lost lockstep.
    pub fn train<M, O, L, I>(
        &mut self,
        model: &mut M,
        optimizer: &mut O,
        loss_fn: &L,
        precision: &mut PrecisionPolicy,
        batches: I,
    ) -> Result<EpochResult>
    where
        M: Model + ?Sized,
        O: Optimizer + ?Sized,
        L: LossFn + ?Sized,
        I: IntoIterator<Item = Batch>,
    {
        model.set_mode(Mode::Train);

        let mut summaries = Vec::new();
        let mut loss_avg = RunningAverage::default();
        let mut skipped = 0;

        for (i, batch) in batches.into_iter().enumerate() {
            let Batch { inputs, labels } = self.device.transfer(batch);

            let output = model.forward(inputs.view())?;
            let loss = loss_fn.loss(output.view(), labels.view());
            let d_loss = loss_fn.loss_prime(output.view(), labels.view());

            model.zero_grad();
            if precision.scale_and_backward(d_loss.view(), model, optimizer)? == StepOutcome::Skipped {
                skipped += 1;
            }

            if i % self.save_summary_steps.get() == 0 {
                let summary = self.metrics.summarize(output.view(), labels.view(), loss);
                summaries.push(self.reducer.reduce_summary(summary)?);
            }

            loss_avg.update(loss);
            debug!(batch = i, loss_avg = loss_avg.get(); "train step");
        }

        if skipped > 0 {
            warn!(skipped = skipped; "optimizer steps skipped due to non finite gradients");
        }

        self.finish("train", &summaries)
    }

    /// Evaluates `model` over one pass of `batches`, every batch is summarized.
    ///
    /// # Arguments
    /// * `model` - The model to evaluate, left in evaluation mode.
    /// * `loss_fn` - The loss to report.
    /// * `batches` - The pass' batches, each consumed once.
    ///
    /// # Returns
    /// The mean of every batch's metrics, or an error if there were no batches, the model
    /// failed or the group lost lockstep.
    pub fn evaluate<M, L, I>(&mut self, model: &mut M, loss_fn: &L, batches: I) -> Result<EpochResult>
    where
        M: Model + ?Sized,
        L: LossFn + ?Sized,
        I: IntoIterator<Item = Batch>,
    {
        model.set_mode(Mode::Eval);

        let mut summaries = Vec::new();

        for batch in batches {
            let Batch { inputs, labels } = self.device.transfer(batch);

            let output = model.forward(inputs.view())?;
            let loss = loss_fn.loss(output.view(), labels.view());

            let summary = self.metrics.summarize(output.view(), labels.view(), loss);
            summaries.push(self.reducer.reduce_summary(summary)?);
        }

        self.finish("eval", &summaries)
    }

    /// Waits for the device and the rest of the group before averaging the pass' summaries.
    fn finish(&mut self, pass: &'static str, summaries: &[MetricSummary]) -> Result<EpochResult> {
        self.device.synchronize()?;

        if self.distributed {
            self.reducer.barrier()?;
        }

        EpochResult::mean(summaries, pass)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ndarray::{Array2, ArrayView2, array};

    use super::*;
    use crate::{
        MlErr,
        arch::{Linear, loss::Mse},
        optimization::GradientDescent,
        precision::{DynamicScaling, LossScaler},
        tensor::StateDict,
    };

    /// Outputs the batch's index, taken from its only input, and counts its backward passes.
    #[derive(Default)]
    struct Echo {
        params: [f32; 1],
        grad: [f32; 1],
        mode: Mode,
        backward_calls: usize,
    }

    impl Model for Echo {
        fn set_mode(&mut self, mode: Mode) {
            self.mode = mode;
        }

        fn forward(&mut self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
            Ok(x.to_owned())
        }

        fn backward(&mut self, _d: ArrayView2<f32>) -> Result<()> {
            if self.mode == Mode::Eval {
                return Err(MlErr::GradientsDisabled);
            }

            self.backward_calls += 1;
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
            StateDict::new()
        }

        fn load_state_dict(&mut self, _state: &StateDict) -> Result<()> {
            Ok(())
        }
    }

    fn indexed_batches(n: usize) -> Vec<Batch> {
        (0..n)
            .map(|i| Batch {
                inputs: array![[i as f32]],
                labels: array![[0.0]],
            })
            .collect()
    }

    fn runner(save_summary_steps: usize, metrics: Metrics) -> EpochRunner {
        EpochRunner::new(
            &DistributedContext::default(),
            metrics,
            NonZeroUsize::new(save_summary_steps).unwrap(),
        )
    }

    #[test]
    fn training_summarizes_on_the_sampling_cadence() {
        static SCORED: AtomicUsize = AtomicUsize::new(0);

        fn batch_index(output: ArrayView2<f32>, _: ArrayView2<f32>) -> f32 {
            SCORED.fetch_add(1, Ordering::SeqCst);
            output[[0, 0]]
        }

        let metrics = Metrics::new().with("batch", batch_index).unwrap();
        let mut runner = runner(5, metrics);
        let mut model = Echo::default();

        let result = runner
            .train(
                &mut model,
                &mut GradientDescent::new(0.1),
                &Mse,
                &mut PrecisionPolicy::Full,
                indexed_batches(12),
            )
            .unwrap();

        // Batches 0, 5 and 10 are summarized, every one of them is trained on.
        assert_eq!(SCORED.load(Ordering::SeqCst), 3);
        assert_eq!(result.get("batch"), Some(5.0));
        assert_eq!(model.backward_calls, 12);

        // Mse of outputs 0, 5 and 10 against 0.
        assert_eq!(result.get("loss"), Some((0.0 + 25.0 + 100.0) / 3.0));
    }

    #[test]
    fn evaluation_summarizes_every_batch_without_gradients() {
        let mut runner = runner(5, Metrics::new());
        let mut model = Echo::default();

        let result = runner.evaluate(&mut model, &Mse, indexed_batches(4)).unwrap();

        assert_eq!(model.mode, Mode::Eval);
        assert_eq!(model.backward_calls, 0);
        assert_eq!(result.get("loss"), Some((0.0 + 1.0 + 4.0 + 9.0) / 4.0));
    }

    #[test]
    fn an_empty_pass_is_an_error() {
        let mut runner = runner(1, Metrics::from_names(["accuracy"]).unwrap());
        let mut model = Linear::new(1, 2, 0);

        assert!(matches!(
            runner.evaluate(&mut model, &Mse, Vec::new()),
            Err(MlErr::EmptyDataset { pass: "eval" })
        ));
        assert!(matches!(
            runner.train(
                &mut model,
                &mut GradientDescent::new(0.1),
                &Mse,
                &mut PrecisionPolicy::Full,
                Vec::new(),
            ),
            Err(MlErr::EmptyDataset { pass: "train" })
        ));
    }

    #[test]
    fn training_lowers_the_loss() {
        let batches = || {
            (0..8).map(|i| {
                let x = i as f32 / 8.0;
                Batch {
                    inputs: array![[x]],
                    labels: array![[3.0 * x - 1.0]],
                }
            })
        };

        let mut runner = runner(1, Metrics::new());
        let mut model = Linear::new(1, 1, 3);
        let mut optimizer = GradientDescent::new(0.2);
        let mut precision = PrecisionPolicy::Full;

        let before = runner.evaluate(&mut model, &Mse, batches()).unwrap();
        for _ in 0..20 {
            runner
                .train(&mut model, &mut optimizer, &Mse, &mut precision, batches())
                .unwrap();
        }
        let after = runner.evaluate(&mut model, &Mse, batches()).unwrap();

        assert!(after.get("loss").unwrap() < before.get("loss").unwrap());
    }

    #[test]
    fn an_overflowing_batch_is_skipped_and_the_pass_goes_on() {
        let batch = |label: f32| Batch {
            inputs: array![[1.0]],
            labels: array![[label]],
        };
        let fresh_model = || {
            let mut model = Linear::new(1, 1, 0);
            model.parts_mut().0.copy_from_slice(&[1.0, 0.0]);
            model
        };

        // The first gradient, 4 scaled by 2^16, overflows half precision. The rest fit
        // even before backing off.
        let batches = vec![batch(-1.0), batch(0.9995), batch(0.999)];

        let mut runner = runner(1, Metrics::new());
        let mut model = fresh_model();
        let mut precision = PrecisionPolicy::Mixed(LossScaler::dynamic(DynamicScaling::default()));

        let result = runner
            .train(
                &mut model,
                &mut GradientDescent::new(0.1),
                &Mse,
                &mut precision,
                batches.clone(),
            )
            .unwrap();

        assert_eq!(precision.scale(), Some(32768.0));
        assert!(result.get("loss").unwrap().is_finite());
        assert_ne!(model.params(), &[1.0, 0.0]);

        // Same as never having seen the first batch.
        let mut expected = fresh_model();
        runner
            .train(
                &mut expected,
                &mut GradientDescent::new(0.1),
                &Mse,
                &mut PrecisionPolicy::Mixed(LossScaler::fixed(32768.0)),
                batches[1..].to_vec(),
            )
            .unwrap();

        assert_eq!(model.params(), expected.params());
    }
}
