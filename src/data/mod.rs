pub mod dataset;
pub mod manifest;
pub mod loader;
pub mod synthetic;

pub use dataset::{InMemoryDataset, VolumeDataset};
pub use manifest::ManifestDataset;
pub use loader::{DataLoader, DataSource, LoaderOptions};
pub use synthetic::phantom_dataset;
