use crate::error::{Error, Result};
use crate::math::matrix::Matrix;
use crate::optim::{Optimizer, Param};

/// Adam with L2 weight decay folded into the gradient.
///
/// Moment buffers are created on the first step and are matched to parameters
/// by position, so every step must pass parameters in the same order.
#[derive(Debug)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
    step: u64,
    moments: Vec<(Matrix, Matrix)>,
}

impl Adam {
    pub fn new(learning_rate: f64, weight_decay: f64) -> Adam {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
            step: 0,
            moments: Vec::new(),
        }
    }

    /// Number of updates applied so far.
    pub fn steps_taken(&self) -> u64 {
        self.step
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Param<'_>]) -> Result<()> {
        if self.moments.is_empty() {
            self.moments = params.iter()
                .map(|p| (Matrix::zeros(p.value.rows, p.value.cols), Matrix::zeros(p.value.rows, p.value.cols)))
                .collect();
        }
        if self.moments.len() != params.len() {
            return Err(Error::Shape(format!(
                "optimizer tracks {} parameters, got {}",
                self.moments.len(), params.len()
            )));
        }

        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step as i32);

        for (param, (m, v)) in params.iter_mut().zip(self.moments.iter_mut()) {
            if !m.same_shape(&*param.value) || !param.grad.same_shape(&*param.value) {
                return Err(Error::Shape(format!("parameter `{}` changed shape", param.name)));
            }
            let values = param.value.iter_mut();
            let grads = param.grad.iter();
            for (((w, &g), mi), vi) in values.zip(grads).zip(m.iter_mut()).zip(v.iter_mut()) {
                let g = g + self.weight_decay * *w;
                *mi = self.beta1 * *mi + (1.0 - self.beta1) * g;
                *vi = self.beta2 * *vi + (1.0 - self.beta2) * g * g;
                let m_hat = *mi / bias1;
                let v_hat = *vi / bias2;
                *w -= self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        // With bias correction the first update is lr * sign(g).
        let mut value = Matrix::from_data(vec![vec![0.0, 0.0]]);
        let grad = Matrix::from_data(vec![vec![2.0, -0.01]]);
        let mut adam = Adam::new(0.1, 0.0);
        adam.step(&mut [Param { name: "w".into(), value: &mut value, grad: &grad }]).unwrap();
        assert!((value.data[0][0] + 0.1).abs() < 1e-6);
        assert!((value.data[0][1] - 0.1).abs() < 1e-4);
        assert_eq!(adam.steps_taken(), 1);
    }

    #[test]
    fn parameter_count_must_stay_fixed() {
        let mut a = Matrix::zeros(1, 1);
        let mut b = Matrix::zeros(1, 1);
        let g = Matrix::zeros(1, 1);
        let mut adam = Adam::new(0.1, 0.0);
        adam.step(&mut [Param { name: "a".into(), value: &mut a, grad: &g }]).unwrap();
        let err = adam.step(&mut [
            Param { name: "a".into(), value: &mut a, grad: &g },
            Param { name: "b".into(), value: &mut b, grad: &g },
        ]);
        assert!(matches!(err, Err(Error::Shape(_))));
    }
}
