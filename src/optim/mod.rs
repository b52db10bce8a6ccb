pub mod sgd;
pub mod adam;
pub mod schedule;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::matrix::Matrix;

pub use sgd::Sgd;
pub use adam::Adam;
pub use schedule::{LrSchedule, ScheduleKind, MultiStepLr, StepLr, ConstantLr};

/// A trainable tensor and the gradient accumulated for it.
pub struct Param<'a> {
    pub name: String,
    pub value: &'a mut Matrix,
    pub grad: &'a Matrix,
}

/// Updates parameters from their accumulated gradients.
pub trait Optimizer {
    /// Applies one update. `params` must arrive in the same order every call.
    fn step(&mut self, params: &mut [Param<'_>]) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Optimizer selection as written in the run configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub fn build(self, learning_rate: f64, weight_decay: f64) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Adam => Box::new(Adam::new(learning_rate, weight_decay)),
            OptimizerKind::Sgd => Box::new(Sgd::new(learning_rate).with_weight_decay(weight_decay)),
        }
    }
}
