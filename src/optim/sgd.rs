use crate::error::Result;
use crate::optim::{Optimizer, Param};

/// Plain gradient descent with optional L2 weight decay.
pub struct Sgd {
    pub learning_rate: f64,
    pub weight_decay: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate, weight_decay: 0.0 }
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Sgd {
        self.weight_decay = weight_decay;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [Param<'_>]) -> Result<()> {
        for param in params.iter_mut() {
            for (w, g) in param.value.iter_mut().zip(param.grad.iter()) {
                *w -= self.learning_rate * (g + self.weight_decay * *w);
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}
