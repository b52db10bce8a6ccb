use serde::{Serialize, Deserialize};
use std::f64::consts::E;

use crate::math::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    Sigmoid,
    #[serde(rename = "relu")]
    ReLU,
    Identity,
    /// Row-wise softmax over the class axis. Applied at the layer level by
    /// [`ActivationFunction::activate`]; the element-wise methods do not cover it.
    Softmax,
    Tanh,
    #[serde(rename = "leaky_relu")]
    LeakyReLU { alpha: f64 },
}

impl ActivationFunction {
    /// Element-wise activation. `Softmax` has no element-wise form and passes
    /// `x` through; [`ActivationFunction::activate`] applies it per row.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => 1.0 / (1.0 + E.powf(-x)),
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Identity => x,
            ActivationFunction::Softmax => x,
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { x } else { alpha * x },
        }
    }

    /// Element-wise derivative evaluated at the pre-activation `x`. `Softmax`
    /// reports 1.0; its Jacobian is handled by [`ActivationFunction::backward`].
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            },
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Softmax => 1.0,
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { 1.0 } else { *alpha },
        }
    }

    /// Applies the activation to a (rows × units) pre-activation matrix.
    pub fn activate(&self, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Softmax => softmax_rows(z),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// Maps ∂L/∂a to ∂L/∂z.
    ///
    /// `z` is the cached pre-activation and `a` the cached activation. For
    /// softmax the full Jacobian-vector product is taken per row:
    /// ∂L/∂z_i = a_i · (g_i − Σ_j a_j g_j).
    pub fn backward(&self, grad: &Matrix, z: &Matrix, a: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Softmax => {
                let data = grad.data.iter().zip(a.data.iter())
                    .map(|(g, p)| {
                        let dot: f64 = g.iter().zip(p.iter()).map(|(g, p)| g * p).sum();
                        g.iter().zip(p.iter()).map(|(g, p)| p * (g - dot)).collect()
                    })
                    .collect();
                Matrix::from_data(data)
            }
            _ => grad.hadamard(&z.map(|x| self.derivative(x))),
        }
    }
}

/// Numerically stable softmax applied to each row independently.
pub fn softmax_rows(z: &Matrix) -> Matrix {
    let data = z.data.iter()
        .map(|row| {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = row.iter().map(|x| (x - max).exp()).collect();
            let sum: f64 = exps.iter().sum();
            exps.into_iter().map(|e| e / sum).collect()
        })
        .collect();
    Matrix::from_data(data)
}
