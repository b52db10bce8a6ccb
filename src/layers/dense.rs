use rand::Rng;

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};
use crate::error::{Error, Result};

/// Cached values from the last train-mode forward pass.
#[derive(Debug, Clone)]
struct ForwardCache {
    input: Matrix,
    pre_activation: Matrix,
    activation: Matrix,
}

/// Fully connected layer operating on a batch of rows: `a = f(X·W + b)`.
///
/// `weights` is (input_size × size) and `biases` is (1 × size). Gradients are
/// accumulated into `weights_grad`/`biases_grad` until [`Layer::zero_grad`].
#[derive(Debug)]
pub struct Layer{
    pub size: usize,
    pub input_size: usize,
    pub weights: Matrix,
    pub biases: Matrix,
    pub weights_grad: Matrix,
    pub biases_grad: Matrix,
    pub activator: ActivationFunction,
    cache: Option<ForwardCache>,
}

impl Layer {
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Layer {
        let weights = match activation {
            ActivationFunction::ReLU | ActivationFunction::LeakyReLU { .. } => {
                Matrix::he(input_size, size, rng)
            }
            _ => Matrix::xavier(input_size, size, rng),
        };

        Layer {
            size,
            input_size,
            weights,
            biases: Matrix::zeros(1, size),
            weights_grad: Matrix::zeros(input_size, size),
            biases_grad: Matrix::zeros(1, size),
            activator: activation,
            cache: None,
        }
    }

    /// Forward pass over `input` (rows × input_size).
    ///
    /// With `keep_cache` the input, pre-activation and activation are kept for
    /// [`Layer::backward`]; otherwise any stale cache is dropped.
    pub fn feed_from(&mut self, input: Matrix, keep_cache: bool, parallel: bool) -> Result<Matrix> {
        if input.cols != self.input_size {
            return Err(Error::Shape(format!(
                "layer expects {} inputs, got {}",
                self.input_size, input.cols
            )));
        }
        let product = if parallel {
            input.par_matmul(&self.weights)
        } else {
            input.matmul(&self.weights)
        };
        let z = product.add_row(&self.biases);
        let a = self.activator.activate(&z);

        self.cache = if keep_cache {
            Some(ForwardCache { input, pre_activation: z, activation: a.clone() })
        } else {
            None
        };
        Ok(a)
    }

    /// Backward pass. `grad` is ∂L/∂a for this layer's output.
    ///
    /// Accumulates parameter gradients and returns ∂L/∂input.
    pub fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let cache = self.cache.as_ref().ok_or_else(|| {
            Error::Model("backward called without a cached train-mode forward pass".into())
        })?;
        if !grad.same_shape(&cache.activation) {
            return Err(Error::Shape(format!(
                "gradient is {}x{}, layer output is {}x{}",
                grad.rows, grad.cols, cache.activation.rows, cache.activation.cols
            )));
        }

        // δ = ∂L/∂z
        let delta = self.activator.backward(grad, &cache.pre_activation, &cache.activation);

        self.weights_grad.add_assign(&cache.input.transpose().matmul(&delta));
        self.biases_grad.add_assign(&delta.column_sums());

        Ok(delta.matmul(&self.weights.transpose()))
    }

    pub fn zero_grad(&mut self) {
        self.weights_grad = Matrix::zeros(self.input_size, self.size);
        self.biases_grad = Matrix::zeros(1, self.size);
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }
}
