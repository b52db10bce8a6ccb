use std::path::PathBuf;

use serde::{Serialize, Deserialize};

/// One logged training step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub epoch: usize,
    pub step: usize,
    pub loss: f64,
    /// Mean organ accuracy of the stage-2 output for this batch.
    pub accuracy: f64,
    pub learning_rate: f64,
    /// Wall-clock minutes since the run started.
    pub elapsed_min: f64,
}

/// Held-out evaluation attached to an epoch selected by the validation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub epoch: usize,
    /// Ordered like the configured organ names.
    pub per_class_accuracy: Vec<f64>,
    pub mean_accuracy: f64,
}

/// Per-epoch training statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    /// 0-based epoch index.
    pub epoch: usize,
    pub mean_loss: f64,
    pub mean_accuracy: f64,
    /// Mean stage-1 accuracy, when stage-1 tracking is enabled.
    pub mean_stage1_accuracy: Option<f64>,
    pub steps: usize,
    /// Steps dropped because the loss was not finite.
    pub skipped_steps: usize,
    pub validation: Option<ValidationSummary>,
    pub checkpoint: Option<PathBuf>,
    pub elapsed_min: f64,
}

/// Progress events sent over `RunHooks::progress_tx`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainEvent {
    Step(StepStats),
    Validation(ValidationSummary),
    Checkpoint(PathBuf),
    Epoch(EpochSummary),
}
