use crate::error::{Error, Result};

/// Running collection of one scalar metric over the steps of an epoch.
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        RunningMean::default()
    }

    pub fn accumulate(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Arithmetic mean of everything accumulated for `epoch`.
    ///
    /// Fails with [`Error::NoSteps`] when nothing was accumulated.
    pub fn mean(&self, epoch: usize) -> Result<f64> {
        if self.count == 0 {
            return Err(Error::NoSteps { epoch });
        }
        Ok(self.sum / self.count as f64)
    }

    pub fn reset(&mut self) {
        *self = RunningMean::default();
    }
}
