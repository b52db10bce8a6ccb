pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod volume;
pub mod loss;
pub mod metrics;
pub mod optim;
pub mod data;
pub mod train;

// Convenience re-exports
pub use error::{Error, Result};
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use network::{ModelSpec, SegmentationModel, TwoStageNet};
pub use volume::{Batch, LabelVolume, Prediction, Sample, Volume, VolumeShape};
pub use loss::{LossType, StageLoss};
pub use metrics::{AccuracyKernel, DiceAccuracy};
pub use optim::{Adam, Optimizer, Sgd};
pub use data::{DataLoader, ManifestDataset, VolumeDataset};
pub use train::{train_loop, TrainConfig};
