use rand::{rngs::StdRng, SeedableRng};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::math::matrix::Matrix;
use crate::network::model::{Mode, ModelState, SegmentationModel, StageGradients, StageOutputs};
use crate::network::network::Network;
use crate::network::spec::ModelSpec;
use crate::optim::Param;
use crate::volume::{ClassProbabilities, Prediction, Volume};

/// Two-stage voxel classifier.
///
/// Stage 1 predicts class probabilities from each voxel's intensity patch.
/// Stage 2 sees the same patch plus the stage-1 probabilities of the voxel and
/// produces the refined prediction. Gradients reaching stage 2's probability
/// inputs are routed back into stage 1.
#[derive(Debug)]
pub struct TwoStageNet {
    spec: ModelSpec,
    stage1: Network,
    stage2: Network,
    mode: Mode,
    parallel: bool,
    /// Voxel count per sample of the last train-mode forward pass.
    cached_rows: Option<Vec<usize>>,
}

impl TwoStageNet {
    /// Builds the network with weights drawn from a `seed`ed RNG.
    pub fn new(spec: ModelSpec, seed: u64) -> Result<Self> {
        spec.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let patch = spec.patch_len();
        let stage1 = Network::new(stack(patch, &spec.stage1_hidden, &spec), &mut rng);
        let stage2 = Network::new(stack(patch + spec.num_classes, &spec.stage2_hidden, &spec), &mut rng);
        Ok(TwoStageNet {
            spec,
            stage1,
            stage2,
            mode: Mode::Train,
            parallel: false,
            cached_rows: None,
        })
    }

    /// Computes matrix products on the rayon pool.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Gathers the zero-padded intensity cube around every voxel.
    fn patches(&self, volume: &Volume) -> Matrix {
        let r = self.spec.patch_radius as isize;
        let shape = volume.shape;
        let mut rows = Vec::with_capacity(shape.voxels());
        for z in 0..shape.depth as isize {
            for y in 0..shape.height as isize {
                for x in 0..shape.width as isize {
                    let mut row = Vec::with_capacity(self.spec.patch_len());
                    for dz in -r..=r {
                        for dy in -r..=r {
                            for dx in -r..=r {
                                row.push(volume.at_padded(z + dz, y + dy, x + dx));
                            }
                        }
                    }
                    rows.push(row);
                }
            }
        }
        Matrix { rows: rows.len(), cols: self.spec.patch_len(), data: rows }
    }
}

/// Hidden layers followed by a softmax classification layer.
fn stack(input: usize, hidden: &[usize], spec: &ModelSpec) -> Vec<(usize, usize, ActivationFunction)> {
    let mut layers = Vec::with_capacity(hidden.len() + 1);
    let mut fan_in = input;
    for &width in hidden {
        layers.push((width, fan_in, spec.activation));
        fan_in = width;
    }
    layers.push((spec.num_classes, fan_in, ActivationFunction::Softmax));
    layers
}

fn split_rows(all: &Matrix, volumes: &[Volume]) -> Prediction {
    let mut start = 0;
    let samples = volumes.iter()
        .map(|v| {
            let end = start + v.shape.voxels();
            let probs = all.row_slice(start, end);
            start = end;
            ClassProbabilities { shape: v.shape, probs }
        })
        .collect();
    Prediction { samples }
}

fn stack_grads(grads: &[Matrix], rows: &[usize], classes: usize, stage: &str) -> Result<Matrix> {
    if grads.len() != rows.len() {
        return Err(Error::Shape(format!(
            "{stage} gradient has {} samples, forward pass had {}",
            grads.len(), rows.len()
        )));
    }
    for (g, &n) in grads.iter().zip(rows) {
        if g.rows != n || g.cols != classes {
            return Err(Error::Shape(format!(
                "{stage} gradient is {}x{}, expected {}x{}",
                g.rows, g.cols, n, classes
            )));
        }
    }
    Ok(Matrix::vstack(grads))
}

impl SegmentationModel for TwoStageNet {
    fn num_classes(&self) -> usize {
        self.spec.num_classes
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode == Mode::Eval {
            self.stage1.clear_cache();
            self.stage2.clear_cache();
            self.cached_rows = None;
        }
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn forward(&mut self, volumes: &[Volume]) -> Result<StageOutputs> {
        if volumes.is_empty() {
            return Err(Error::Shape("forward called with an empty batch".into()));
        }
        let train = self.mode == Mode::Train;
        let patches: Vec<Matrix> = volumes.iter().map(|v| self.patches(v)).collect();
        let x = Matrix::vstack(&patches);

        let p1 = self.stage1.forward(x.clone(), train, self.parallel)?;
        let p2 = self.stage2.forward(x.hstack(&p1), train, self.parallel)?;

        self.cached_rows = train.then(|| volumes.iter().map(|v| v.shape.voxels()).collect());

        Ok(StageOutputs {
            stage1: split_rows(&p1, volumes),
            stage2: split_rows(&p2, volumes),
        })
    }

    fn zero_grad(&mut self) {
        self.stage1.zero_grad();
        self.stage2.zero_grad();
    }

    fn backward(&mut self, grads: &StageGradients) -> Result<()> {
        if self.mode != Mode::Train {
            return Err(Error::Model("backward is not available in eval mode".into()));
        }
        let rows = self.cached_rows.take().ok_or_else(|| {
            Error::Model("backward called without a train-mode forward pass".into())
        })?;
        let classes = self.spec.num_classes;
        let g2 = stack_grads(&grads.stage2, &rows, classes, "stage 2")?;
        let mut g1 = stack_grads(&grads.stage1, &rows, classes, "stage 1")?;

        let dx2 = self.stage2.backward(&g2)?;
        let patch = self.spec.patch_len();
        g1.add_assign(&dx2.col_slice(patch, patch + classes));
        self.stage1.backward(&g1)?;
        Ok(())
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        let mut params = self.stage1.parameters("stage1");
        params.extend(self.stage2.parameters("stage2"));
        params
    }

    fn state(&self) -> ModelState {
        let mut tensors = self.stage1.state("stage1");
        tensors.extend(self.stage2.state("stage2"));
        ModelState { tensors }
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        self.stage1.load_state("stage1", &state.tensors)?;
        self.stage2.load_state("stage2", &state.tensors)?;
        self.cached_rows = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeShape;

    fn tiny_spec() -> ModelSpec {
        ModelSpec {
            patch_radius: 1,
            num_classes: 3,
            stage1_hidden: vec![4],
            stage2_hidden: vec![4],
            activation: ActivationFunction::Tanh,
        }
    }

    fn volume(seed: f64) -> Volume {
        let shape = VolumeShape::new(2, 2, 2);
        Volume::new(shape, (0..8).map(|i| ((i as f64 + seed) * 0.37).sin().abs()).collect()).unwrap()
    }

    #[test]
    fn forward_yields_distributions_per_sample() {
        let mut net = TwoStageNet::new(tiny_spec(), 1).unwrap();
        let out = net.forward(&[volume(0.0), volume(1.0)]).unwrap();
        assert_eq!(out.stage1.len(), 2);
        assert_eq!(out.stage2.samples[1].probs.rows, 8);
        for row in &out.stage2.samples[0].probs.data {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn eval_mode_refuses_backward() {
        let mut net = TwoStageNet::new(tiny_spec(), 1).unwrap();
        net.set_mode(Mode::Eval);
        let out = net.forward(&[volume(0.0)]).unwrap();
        let grads = StageGradients {
            stage1: vec![out.stage1.samples[0].probs.clone()],
            stage2: vec![out.stage2.samples[0].probs.clone()],
        };
        assert!(matches!(net.backward(&grads), Err(Error::Model(_))));
    }

    #[test]
    fn stage_two_gradient_reaches_stage_one() {
        let mut net = TwoStageNet::new(tiny_spec(), 5).unwrap();
        let out = net.forward(&[volume(0.5)]).unwrap();
        let grads = StageGradients {
            stage1: vec![Matrix::zeros(8, 3)],
            stage2: vec![out.stage2.samples[0].probs.map(|p| p - 0.3)],
        };
        net.backward(&grads).unwrap();
        let params = net.parameters();
        let stage1_grad_norm: f64 = params.iter()
            .filter(|p| p.name.starts_with("stage1"))
            .flat_map(|p| p.grad.iter())
            .map(|g| g.abs())
            .sum();
        assert!(stage1_grad_norm > 0.0);
    }

    #[test]
    fn loaded_state_reproduces_forward_pass() {
        let mut original = TwoStageNet::new(tiny_spec(), 11).unwrap();
        let mut restored = TwoStageNet::new(tiny_spec(), 99).unwrap();
        let before = original.forward(&[volume(0.2)]).unwrap();
        restored.load_state(&original.state()).unwrap();
        restored.set_mode(Mode::Train);
        assert_eq!(restored.forward(&[volume(0.2)]).unwrap(), before);
    }

    #[test]
    fn parallel_products_match_serial() {
        let mut serial = TwoStageNet::new(tiny_spec(), 4).unwrap();
        let mut parallel = TwoStageNet::new(tiny_spec(), 4).unwrap().with_parallel(true);
        assert_eq!(
            serial.forward(&[volume(0.1)]).unwrap(),
            parallel.forward(&[volume(0.1)]).unwrap()
        );
    }
}
