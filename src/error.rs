use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the trainer and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent configuration detected before or while starting a run.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("data source yielded no batches")]
    EmptyDataSource,

    /// Mean requested over an epoch in which no step was recorded.
    #[error("no steps recorded for epoch {epoch}; cannot compute a mean")]
    NoSteps { epoch: usize },

    #[error("organ names ({names}) do not match the model's organ classes ({classes})")]
    OrganMismatch { names: usize, classes: usize },

    #[error("shape mismatch: {0}")]
    Shape(String),

    /// The model was driven in a way its mode does not allow.
    #[error("model error: {0}")]
    Model(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("checkpoint write to {path:?} failed after {attempts} attempts: {source}")]
    CheckpointWrite {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
