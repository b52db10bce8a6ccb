use crate::error::{Error, Result};
use crate::volume::Sample;

/// Indexed collection of (volume, label) samples.
///
/// `Sync` so that loader workers can read samples concurrently.
pub trait VolumeDataset: Sync {
    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Sample>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Samples held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        InMemoryDataset { samples }
    }
}

impl VolumeDataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.samples.get(index).cloned().ok_or_else(|| {
            Error::Dataset(format!("index {index} out of range for {} samples", self.samples.len()))
        })
    }
}
