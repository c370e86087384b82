use std::path::PathBuf;

use dataset::DatasetError;
use thiserror::Error;
use train::TrainError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{what}: {left} files in {left_dir:?} but {right} in {right_dir:?}")]
    CountMismatch {
        what: String,
        left_dir: PathBuf,
        left: usize,
        right_dir: PathBuf,
        right: usize,
    },

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Model call failed: {0:#}")]
    Model(anyhow::Error),

    #[error("Failed to load data.")]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Train(#[from] TrainError),

    #[error("IO error.")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode image.")]
    Image(#[from] image::ImageError),

    #[error("Failed to write table.")]
    Csv(#[from] csv::Error),

    #[error("Failed to serialize.")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint directory {0:?} is already in use by another run")]
    CheckpointLocked(PathBuf),

    #[error("Segmentation failed: {0}")]
    Segmentation(String),
}
