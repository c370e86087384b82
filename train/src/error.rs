use dataset::DatasetError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("IoU threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f32),

    #[error("Data range must be positive and finite, got {0}")]
    InvalidDataRange(f32),

    #[error("Unsupported mask image: {0}")]
    UnsupportedMask(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
