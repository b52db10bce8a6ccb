//! Volumes, label maps and per-voxel class predictions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeShape {
    pub depth: usize,
    pub height: usize,
    pub width: usize,
}

impl VolumeShape {
    pub fn new(depth: usize, height: usize, width: usize) -> Self {
        VolumeShape { depth, height, width }
    }

    pub fn voxels(&self) -> usize {
        self.depth * self.height * self.width
    }

    /// Flat z-major index of voxel (z, y, x).
    pub fn index(&self, z: usize, y: usize, x: usize) -> usize {
        (z * self.height + y) * self.width + x
    }
}

/// CT intensities, normalized to [0, 1], stored z-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub shape: VolumeShape,
    pub data: Vec<f64>,
}

impl Volume {
    pub fn new(shape: VolumeShape, data: Vec<f64>) -> Result<Self> {
        if data.len() != shape.voxels() {
            return Err(Error::Shape(format!(
                "volume {:?} needs {} voxels, got {}",
                shape, shape.voxels(), data.len()
            )));
        }
        Ok(Volume { shape, data })
    }

    /// Intensity at a signed coordinate; zero outside the volume.
    pub fn at_padded(&self, z: isize, y: isize, x: isize) -> f64 {
        let VolumeShape { depth, height, width } = self.shape;
        if z < 0 || y < 0 || x < 0 || z as usize >= depth || y as usize >= height || x as usize >= width {
            return 0.0;
        }
        self.data[self.shape.index(z as usize, y as usize, x as usize)]
    }
}

/// Ground-truth class index per voxel; 0 is background.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVolume {
    pub shape: VolumeShape,
    pub labels: Vec<u8>,
}

impl LabelVolume {
    pub fn new(shape: VolumeShape, labels: Vec<u8>) -> Result<Self> {
        if labels.len() != shape.voxels() {
            return Err(Error::Shape(format!(
                "label volume {:?} needs {} voxels, got {}",
                shape, shape.voxels(), labels.len()
            )));
        }
        Ok(LabelVolume { shape, labels })
    }

    /// Fails if any voxel carries a class index outside `0..num_classes`.
    pub fn check_classes(&self, num_classes: usize) -> Result<()> {
        match self.labels.iter().find(|&&l| l as usize >= num_classes) {
            Some(bad) => Err(Error::Dataset(format!(
                "label {bad} is outside 0..{num_classes}"
            ))),
            None => Ok(()),
        }
    }
}

/// One (volume, label) training pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub volume: Volume,
    pub label: LabelVolume,
}

impl Sample {
    pub fn new(volume: Volume, label: LabelVolume) -> Result<Self> {
        if volume.shape != label.shape {
            return Err(Error::Shape(format!(
                "volume {:?} and label {:?} differ",
                volume.shape, label.shape
            )));
        }
        Ok(Sample { volume, label })
    }
}

/// Samples aligned on the batch dimension.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub volumes: Vec<Volume>,
    pub labels: Vec<LabelVolume>,
}

impl Batch {
    pub fn from_samples(samples: Vec<Sample>) -> Batch {
        let (volumes, labels) = samples.into_iter().map(|s| (s.volume, s.label)).unzip();
        Batch { volumes, labels }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// Class probabilities for every voxel of one sample: (voxels × classes).
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    pub shape: VolumeShape,
    pub probs: Matrix,
}

impl ClassProbabilities {
    pub fn num_classes(&self) -> usize {
        self.probs.cols
    }

    /// Most probable class of every voxel.
    pub fn argmax(&self) -> Vec<u8> {
        self.probs.data.iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i as u8)
                    .unwrap_or(0)
            })
            .collect()
    }
}

/// Stage output for a whole batch, one entry per sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prediction {
    pub samples: Vec<ClassProbabilities>,
}

impl Prediction {
    /// Owned host copy used for measurement. It shares nothing with the
    /// model's backprop caches.
    pub fn detached(&self) -> Prediction {
        self.clone()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Checks batch size, shapes and class count against `labels`.
    pub fn check_against(&self, labels: &[LabelVolume], num_classes: usize) -> Result<()> {
        if self.samples.len() != labels.len() {
            return Err(Error::Shape(format!(
                "prediction has {} samples, labels have {}",
                self.samples.len(), labels.len()
            )));
        }
        for (p, l) in self.samples.iter().zip(labels) {
            if p.shape != l.shape || p.probs.rows != l.labels.len() {
                return Err(Error::Shape(format!(
                    "prediction {:?} does not match label {:?}",
                    p.shape, l.shape
                )));
            }
            if p.num_classes() != num_classes {
                return Err(Error::Shape(format!(
                    "prediction has {} classes, expected {}",
                    p.num_classes(), num_classes
                )));
            }
        }
        Ok(())
    }
}
