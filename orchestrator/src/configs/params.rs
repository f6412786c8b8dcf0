use std::{fs, num::NonZeroUsize, path::Path, time::Duration};

use machine_learning::{
    DynamicScaling, LossScaler, PrecisionPolicy,
    arch::loss::{CrossEntropy, LossFn, Mse},
    metrics::{LOSS_KEY, Metrics},
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
};
use serde::{Deserialize, Serialize};

use crate::{OrchestratorError, Result};

/// The hyperparameter file expected inside every model directory.
pub const PARAMS_FILE: &str = "params.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
    Momentum,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    CrossEntropy,
    Mse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Dynamic,
}

/// How the loss is scaled when `fp16` is on: `"dynamic"`, an object of dynamic scaling
/// tunables, or a static number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LossScale {
    Static(f32),
    Named(ScaleMode),
    Dynamic(DynamicScaling),
}

impl Default for LossScale {
    fn default() -> Self {
        Self::Named(ScaleMode::Dynamic)
    }
}

/// The hyperparameters of a model directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    pub learning_rate: f32,
    pub batch_size: NonZeroUsize,
    pub num_epochs: usize,
    /// While training only one every `save_summary_steps` batches is summarized.
    #[serde(default = "default_save_summary_steps")]
    pub save_summary_steps: NonZeroUsize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub fp16: bool,
    #[serde(default)]
    pub loss_scale: LossScale,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default)]
    pub loss: LossKind,
    /// The amount of model outputs, regression targets when the loss is `mse`.
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    /// The evaluation metric the best checkpoint is chosen by, higher is better.
    #[serde(default = "default_primary_metric")]
    pub primary_metric: String,
    #[serde(default = "default_collective_timeout_secs")]
    pub collective_timeout_secs: u64,
}

fn default_save_summary_steps() -> NonZeroUsize {
    NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN)
}

fn default_seed() -> u64 {
    230
}

fn default_momentum() -> f32 {
    0.9
}

fn default_num_classes() -> usize {
    2
}

fn default_metrics() -> Vec<String> {
    vec![default_primary_metric()]
}

fn default_primary_metric() -> String {
    "accuracy".to_string()
}

fn default_collective_timeout_secs() -> u64 {
    1800
}

impl Params {
    /// Loads and validates `<model_dir>/params.json`.
    ///
    /// # Arguments
    /// * `model_dir` - The model directory.
    ///
    /// # Returns
    /// The hyperparameters or a `Config` error naming the file.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(PARAMS_FILE);
        let origin = path.display().to_string();

        let raw = fs::read_to_string(&path).map_err(|e| {
            OrchestratorError::config(&origin, format!("no hyperparameter file found ({e})"))
        })?;

        Self::from_json(&raw, &origin)
    }

    /// Parses and validates hyperparameters from a JSON document.
    ///
    /// # Arguments
    /// * `raw` - The JSON document.
    /// * `origin` - Where the document came from, for errors.
    pub fn from_json(raw: &str, origin: &str) -> Result<Self> {
        let params: Self =
            serde_json::from_str(raw).map_err(|e| OrchestratorError::config(origin, e))?;

        params
            .validate()
            .map_err(|reason| OrchestratorError::config(origin, reason))?;

        Ok(params)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(format!("learning_rate must be positive, got {}", self.learning_rate));
        }

        if self.num_classes == 0 {
            return Err("num_classes must be at least 1".to_string());
        }

        if self.collective_timeout_secs == 0 {
            return Err("collective_timeout_secs must be at least 1".to_string());
        }

        if let LossScale::Static(scale) = self.loss_scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(format!("a static loss_scale must be positive, got {scale}"));
            }
        }

        Metrics::from_names(&self.metrics).map_err(|e| e.to_string())?;

        if self.primary_metric == LOSS_KEY {
            return Err(format!(
                "primary_metric can't be {LOSS_KEY}, the best checkpoint maximizes it"
            ));
        }

        if !self.metrics.contains(&self.primary_metric) {
            return Err(format!(
                "primary_metric {} isn't among the metrics {:?}",
                self.primary_metric, self.metrics
            ));
        }

        Ok(())
    }

    /// Builds the configured optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters it'll update.
    pub fn optimizer(&self, len: usize) -> Box<dyn Optimizer> {
        let lr = self.learning_rate;

        match self.optimizer {
            OptimizerKind::Adam => Box::new(Adam::with_defaults(len, lr)),
            OptimizerKind::Sgd => Box::new(GradientDescent::new(lr)),
            OptimizerKind::Momentum => {
                Box::new(GradientDescentWithMomentum::new(len, lr, self.momentum))
            }
        }
    }

    pub fn loss_fn(&self) -> Box<dyn LossFn> {
        match self.loss {
            LossKind::CrossEntropy => Box::new(CrossEntropy),
            LossKind::Mse => Box::new(Mse),
        }
    }

    /// Builds the precision policy, every call starts a fresh loss scale.
    pub fn precision(&self) -> PrecisionPolicy {
        if !self.fp16 {
            return PrecisionPolicy::Full;
        }

        let scaler = match self.loss_scale {
            LossScale::Static(scale) => LossScaler::fixed(scale),
            LossScale::Named(ScaleMode::Dynamic) => LossScaler::dynamic(DynamicScaling::default()),
            LossScale::Dynamic(config) => LossScaler::dynamic(config),
        };

        PrecisionPolicy::Mixed(scaler)
    }

    pub fn metrics(&self) -> Result<Metrics> {
        Ok(Metrics::from_names(&self.metrics)?)
    }

    pub fn collective_timeout(&self) -> Duration {
        Duration::from_secs(self.collective_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{"learning_rate": 0.001, "batch_size": 32, "num_epochs": 10}"#;

    fn reason(raw: &str) -> String {
        match Params::from_json(raw, "params.json") {
            Err(OrchestratorError::Config { reason, .. }) => reason,
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn missing_fields_take_their_defaults() {
        let params = Params::from_json(MINIMAL, "params.json").unwrap();

        assert_eq!(params.save_summary_steps.get(), 100);
        assert_eq!(params.seed, 230);
        assert!(!params.fp16);
        assert!(!params.distributed);
        assert_eq!(params.optimizer, OptimizerKind::Adam);
        assert_eq!(params.loss, LossKind::CrossEntropy);
        assert_eq!(params.metrics, ["accuracy"]);
        assert_eq!(params.primary_metric, "accuracy");
        assert_eq!(params.collective_timeout(), Duration::from_secs(1800));
        assert!(matches!(params.precision(), PrecisionPolicy::Full));
    }

    #[test]
    fn loss_scale_accepts_a_name_tunables_or_a_number() {
        let with = |scale: &str| {
            let raw = format!(
                r#"{{"learning_rate": 0.1, "batch_size": 1, "num_epochs": 1, "fp16": true, "loss_scale": {scale}}}"#
            );
            Params::from_json(&raw, "params.json").unwrap().precision().scale()
        };

        assert_eq!(with(r#""dynamic""#), Some(65536.0));
        assert_eq!(with(r#"{"init_scale": 1024}"#), Some(1024.0));
        assert_eq!(with("128"), Some(128.0));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let raw = r#"{"learning_rate": 0.1, "batch_size": 0, "num_epochs": 1}"#;
        assert!(!reason(raw).is_empty());
    }

    #[test]
    fn unknown_metrics_are_rejected() {
        let raw = r#"{"learning_rate": 0.1, "batch_size": 1, "num_epochs": 1, "metrics": ["f1"]}"#;
        assert!(reason(raw).contains("f1"));
    }

    #[test]
    fn the_primary_metric_must_be_computed() {
        let raw = r#"{"learning_rate": 0.1, "batch_size": 1, "num_epochs": 1, "metrics": []}"#;
        assert!(reason(raw).contains("isn't among the metrics"));

        let raw = r#"{"learning_rate": 0.1, "batch_size": 1, "num_epochs": 1, "primary_metric": "loss"}"#;
        assert!(reason(raw).contains("can't be loss"));
    }

    #[test]
    fn a_missing_file_names_its_path() {
        let dir = tempfile::tempdir().unwrap();

        match Params::load(dir.path()) {
            Err(OrchestratorError::Config { origin, .. }) => assert!(origin.ends_with(PARAMS_FILE)),
            other => panic!("expected a config error, got {other:?}"),
        }
    }
}
