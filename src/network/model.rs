use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::matrix::Matrix;
use crate::optim::Param;
use crate::volume::{Prediction, Volume};

/// Train mode keeps activations for backprop; eval mode keeps nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// The two prediction heads of a two-stage model for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutputs {
    pub stage1: Prediction,
    pub stage2: Prediction,
}

/// ∂L/∂probability for each stage, one (voxels × classes) matrix per sample.
#[derive(Debug, Clone, Default)]
pub struct StageGradients {
    pub stage1: Vec<Matrix>,
    pub stage2: Vec<Matrix>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub tensor: Matrix,
}

/// Snapshot of every trainable tensor, keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub tensors: Vec<NamedTensor>,
}

/// A two-stage segmentation model as seen by the trainer.
pub trait SegmentationModel {
    /// Classes including background.
    fn num_classes(&self) -> usize;

    fn set_mode(&mut self, mode: Mode);

    fn mode(&self) -> Mode;

    /// Runs both stages over a batch of volumes.
    fn forward(&mut self, volumes: &[Volume]) -> Result<StageOutputs>;

    /// Clears accumulated parameter gradients.
    fn zero_grad(&mut self);

    /// Backpropagates stage gradients from the last train-mode forward pass.
    fn backward(&mut self, grads: &StageGradients) -> Result<()>;

    fn parameters(&mut self) -> Vec<Param<'_>>;

    fn state(&self) -> ModelState;

    fn load_state(&mut self, state: &ModelState) -> Result<()>;
}
