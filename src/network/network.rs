use rand::Rng;

use crate::{activation::activation::ActivationFunction, layers::dense::Layer};
use crate::error::{Error, Result};
use crate::math::matrix::Matrix;
use crate::network::model::NamedTensor;
use crate::optim::Param;

/// A stack of dense layers applied to a batch of rows.
#[derive(Debug)]
pub struct Network {
    pub layers: Vec<Layer>,
}

impl Network {
    /// Builds a network from (size, input_size, activation) tuples.
    pub fn new<R: Rng + ?Sized>(
        layer_specs: Vec<(usize, usize, ActivationFunction)>,
        rng: &mut R,
    ) -> Network {
        let layers = layer_specs.into_iter()
            .map(|(size, input_size, activation)| Layer::new(size, input_size, activation, rng))
            .collect();
        Network { layers }
    }

    /// Forward pass; with `keep_cache` each layer stores what backprop needs.
    pub fn forward(&mut self, input: Matrix, keep_cache: bool, parallel: bool) -> Result<Matrix> {
        let mut current = input;
        for layer in &mut self.layers {
            current = layer.feed_from(current, keep_cache, parallel)?;
        }
        Ok(current)
    }

    /// Backward pass from ∂L/∂output; returns ∂L/∂input.
    pub fn backward(&mut self, grad: &Matrix) -> Result<Matrix> {
        let mut delta = grad.clone();
        for layer in self.layers.iter_mut().rev() {
            delta = layer.backward(&delta)?;
        }
        Ok(delta)
    }

    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    pub fn clear_cache(&mut self) {
        for layer in &mut self.layers {
            layer.clear_cache();
        }
    }

    /// Trainable tensors paired with their accumulated gradients, in a stable order.
    pub fn parameters(&mut self, prefix: &str) -> Vec<Param<'_>> {
        let mut params = Vec::with_capacity(self.layers.len() * 2);
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let Layer { weights, biases, weights_grad, biases_grad, .. } = layer;
            params.push(Param { name: format!("{prefix}.{i}.weights"), value: weights, grad: weights_grad });
            params.push(Param { name: format!("{prefix}.{i}.biases"), value: biases, grad: biases_grad });
        }
        params
    }

    pub fn state(&self, prefix: &str) -> Vec<NamedTensor> {
        self.layers.iter().enumerate()
            .flat_map(|(i, layer)| {
                [
                    NamedTensor { name: format!("{prefix}.{i}.weights"), tensor: layer.weights.clone() },
                    NamedTensor { name: format!("{prefix}.{i}.biases"), tensor: layer.biases.clone() },
                ]
            })
            .collect()
    }

    /// Replaces every layer's weights and biases from `tensors`, matched by name.
    pub fn load_state(&mut self, prefix: &str, tensors: &[NamedTensor]) -> Result<()> {
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let weights = find_tensor(tensors, &format!("{prefix}.{i}.weights"), &layer.weights)?;
            let biases = find_tensor(tensors, &format!("{prefix}.{i}.biases"), &layer.biases)?;
            layer.weights = weights;
            layer.biases = biases;
            layer.clear_cache();
        }
        Ok(())
    }
}

fn find_tensor(tensors: &[NamedTensor], name: &str, current: &Matrix) -> Result<Matrix> {
    let found = tensors.iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::Model(format!("state is missing tensor `{name}`")))?;
    if !found.tensor.same_shape(current) {
        return Err(Error::Shape(format!(
            "tensor `{name}` is {}x{}, model expects {}x{}",
            found.tensor.rows, found.tensor.cols, current.rows, current.cols
        )));
    }
    Ok(found.tensor.clone())
}
