//! Learning-rate schedules, advanced once per optimizer step.

use serde::{Deserialize, Serialize};

use crate::optim::Optimizer;

pub trait LrSchedule {
    /// Advances one step and writes the new rate into `optimizer`.
    fn step(&mut self, optimizer: &mut dyn Optimizer);

    fn current_lr(&self) -> f64;
}

/// Schedule selection as written in the run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Constant,
    /// Multiply by `gamma` each time the step count reaches a milestone.
    MultiStep { milestones: Vec<usize>, gamma: f64 },
    /// Multiply by `gamma` every `step_size` steps.
    Step { step_size: usize, gamma: f64 },
}

impl Default for ScheduleKind {
    fn default() -> Self {
        ScheduleKind::MultiStep { milestones: vec![900], gamma: 0.1 }
    }
}

impl ScheduleKind {
    pub fn build(&self, base_lr: f64) -> Box<dyn LrSchedule> {
        match self {
            ScheduleKind::Constant => Box::new(ConstantLr { lr: base_lr }),
            ScheduleKind::MultiStep { milestones, gamma } => {
                Box::new(MultiStepLr::new(base_lr, milestones.clone(), *gamma))
            }
            ScheduleKind::Step { step_size, gamma } => Box::new(StepLr::new(base_lr, *step_size, *gamma)),
        }
    }
}

pub struct ConstantLr {
    pub lr: f64,
}

impl LrSchedule for ConstantLr {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        optimizer.set_learning_rate(self.lr);
    }

    fn current_lr(&self) -> f64 {
        self.lr
    }
}

pub struct MultiStepLr {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    steps: usize,
}

impl MultiStepLr {
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        MultiStepLr { base_lr, milestones, gamma, steps: 0 }
    }
}

impl LrSchedule for MultiStepLr {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        self.steps += 1;
        optimizer.set_learning_rate(self.current_lr());
    }

    fn current_lr(&self) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= self.steps).count();
        self.base_lr * self.gamma.powi(passed as i32)
    }
}

pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
    steps: usize,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        StepLr { base_lr, step_size: step_size.max(1), gamma, steps: 0 }
    }
}

impl LrSchedule for StepLr {
    fn step(&mut self, optimizer: &mut dyn Optimizer) {
        self.steps += 1;
        optimizer.set_learning_rate(self.current_lr());
    }

    fn current_lr(&self) -> f64 {
        self.base_lr * self.gamma.powi((self.steps / self.step_size) as i32)
    }
}
