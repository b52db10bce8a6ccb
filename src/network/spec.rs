use serde::{Serialize, Deserialize};
use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};

/// Architecture of a [`TwoStageNet`](crate::network::TwoStageNet).
///
/// Fields:
/// - `patch_radius`   — each voxel sees the cube of side `2r + 1` around it
/// - `num_classes`    — segmentation classes including background (class 0)
/// - `stage1_hidden`  — hidden layer widths of the coarse stage
/// - `stage2_hidden`  — hidden layer widths of the refinement stage
/// - `activation`     — activation of every hidden layer; outputs are softmax
///
/// `ModelSpec` can be saved to / loaded from JSON independently of the
/// trained weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub patch_radius: usize,
    pub num_classes: usize,
    pub stage1_hidden: Vec<usize>,
    pub stage2_hidden: Vec<usize>,
    pub activation: ActivationFunction,
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec {
            patch_radius: 1,
            num_classes: 9,
            stage1_hidden: vec![32, 16],
            stage2_hidden: vec![16],
            activation: ActivationFunction::ReLU,
        }
    }
}

impl ModelSpec {
    /// Number of intensity features gathered per voxel.
    pub fn patch_len(&self) -> usize {
        let side = 2 * self.patch_radius + 1;
        side * side * side
    }

    /// Segmentation classes excluding background.
    pub fn num_organs(&self) -> usize {
        self.num_classes.saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes < 2 {
            return Err(Error::Config(format!(
                "model needs at least 2 classes (background + one organ), got {}",
                self.num_classes
            )));
        }
        if self.num_classes > u8::MAX as usize + 1 {
            return Err(Error::Config(format!("at most 256 classes are supported, got {}", self.num_classes)));
        }
        if self.stage1_hidden.iter().chain(self.stage2_hidden.iter()).any(|&w| w == 0) {
            return Err(Error::Config("hidden layer widths must be at least 1".into()));
        }
        if self.activation == ActivationFunction::Softmax {
            return Err(Error::Config("softmax is reserved for the stage outputs".into()));
        }
        Ok(())
    }

    /// Serializes the spec to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a `ModelSpec` from a JSON file.
    pub fn load_json(path: &str) -> Result<ModelSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
