use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::loader::LoaderOptions;
use crate::error::{Error, Result};
use crate::loss::loss_type::LossType;
use crate::network::spec::ModelSpec;
use crate::optim::schedule::ScheduleKind;
use crate::optim::OptimizerKind;
use crate::train::checkpoint::{Retention, RetryPolicy};

/// Immutable configuration of a training run, built once at startup.
///
/// # Fields
/// - `epochs`                — number of full passes over the training data
/// - `learning_rate`         — initial optimizer learning rate
/// - `weight_decay`          — L2 penalty added to every gradient
/// - `optimizer`             — `adam` or `sgd`
/// - `schedule`              — learning-rate schedule, advanced once per step
/// - `loss`                  — loss kernel over both stage outputs
/// - `loader`                — batch size, shuffling, workers, pin_memory, seed
/// - `model`                 — two-stage network architecture
/// - `validation_interval`   — validate when `epoch % interval == 0`
/// - `checkpoint_interval`   — checkpoint when `epoch % interval == 0`
/// - `checkpoint_dir`        — where `net<epoch>-<loss>-<acc>.json` files go
/// - `retention`             — which checkpoints stay on disk
/// - `retry`                 — checkpoint write retries and backoff
/// - `resume_from`           — checkpoint loaded into the model before step 0
/// - `organ_names`           — one name per organ class, in class order
/// - `log_every`             — step log / `Step` event every N steps
/// - `log_dir`               — directory of the scalar log
/// - `train_manifest`        — CSV manifest of the training set
/// - `val_manifest`          — CSV manifest of the validation set
/// - `data_parallel`         — run matrix products on the rayon pool
/// - `track_stage1_accuracy` — also aggregate stage-1 accuracy
/// - `seed`                  — weight initialisation seed
///
/// Every field has a default, so a TOML file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub optimizer: OptimizerKind,
    pub schedule: ScheduleKind,
    pub loss: LossType,
    pub loader: LoaderOptions,
    pub model: ModelSpec,
    pub validation_interval: usize,
    pub checkpoint_interval: usize,
    pub checkpoint_dir: PathBuf,
    pub retention: Retention,
    pub retry: RetryPolicy,
    pub resume_from: Option<PathBuf>,
    pub organ_names: Vec<String>,
    pub log_every: usize,
    pub log_dir: PathBuf,
    pub train_manifest: PathBuf,
    pub val_manifest: PathBuf,
    pub data_parallel: bool,
    pub track_stage1_accuracy: bool,
    pub seed: u64,
}

pub const DEFAULT_ORGANS: [&str; 8] = [
    "spleen",
    "left kidney",
    "gallbladder",
    "esophagus",
    "liver",
    "stomach",
    "pancreas",
    "duodenum",
];

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            epochs: 10,
            learning_rate: 1e-4,
            weight_decay: 5e-4,
            optimizer: OptimizerKind::default(),
            schedule: ScheduleKind::default(),
            loss: LossType::default(),
            loader: LoaderOptions::default(),
            model: ModelSpec::default(),
            validation_interval: 5,
            checkpoint_interval: 5,
            checkpoint_dir: PathBuf::from("module"),
            retention: Retention::default(),
            retry: RetryPolicy::default(),
            resume_from: None,
            organ_names: DEFAULT_ORGANS.iter().map(|s| s.to_string()).collect(),
            log_every: 4,
            log_dir: PathBuf::from("runs"),
            train_manifest: PathBuf::from("csv_files/train_info.csv"),
            val_manifest: PathBuf::from("csv_files/val_info.csv"),
            data_parallel: false,
            track_stage1_accuracy: false,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks the settings that can be checked without touching any data.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("validation_interval", self.validation_interval),
            ("checkpoint_interval", self.checkpoint_interval),
            ("log_every", self.log_every),
            ("loader.batch_size", self.loader.batch_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be at least 1")));
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!("learning_rate must be positive, got {}", self.learning_rate)));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(Error::Config(format!("weight_decay must be non-negative, got {}", self.weight_decay)));
        }
        self.model.validate()?;
        if self.organ_names.len() != self.model.num_organs() {
            return Err(Error::OrganMismatch {
                names: self.organ_names.len(),
                classes: self.model.num_organs(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = TrainConfig::default();
        assert_eq!(config.organ_names.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_overrides_only_listed_fields() {
        let text = r#"
            epochs = 2
            validation_interval = 1
            checkpoint_interval = 2
            optimizer = "sgd"

            [loader]
            batch_size = 4
            shuffle = false
            num_workers = 0
            pin_memory = false
            seed = 7

            [schedule]
            kind = "step"
            step_size = 10
            gamma = 0.5

            [retention]
            kind = "keep_best"
            count = 3
            metric = "accuracy"
        "#;
        let config = TrainConfig::from_toml_str(text).unwrap();
        assert_eq!(config.epochs, 2);
        assert_eq!(config.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.loader.batch_size, 4);
        assert_eq!(config.schedule, ScheduleKind::Step { step_size: 10, gamma: 0.5 });
        assert!(matches!(config.retention, Retention::KeepBest { count: 3, .. }));
        assert_eq!(config.learning_rate, 1e-4);
        assert_eq!(config.log_every, 4);
    }

    #[test]
    fn organ_names_must_match_model_classes() {
        let mut config = TrainConfig::default();
        config.organ_names.truncate(5);
        assert!(matches!(config.validate(), Err(Error::OrganMismatch { names: 5, classes: 8 })));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let config = TrainConfig { checkpoint_interval: 0, ..TrainConfig::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
