use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("File IO error: {0}")]
    File(#[from] std::io::Error),

    #[error("Image error: {0}")]
    InvalidImage(#[from] image::ImageError),

    #[error("Invalid load config: {0}")]
    Config(String),

    #[error("Number of images do not match: {left} in {left_dir:?} vs {right} in {right_dir:?}")]
    CountMismatch {
        left_dir: PathBuf,
        left: usize,
        right_dir: PathBuf,
        right: usize,
    },

    #[error("Shape mismatch for {id}: {detail}")]
    ShapeMismatch { id: String, detail: String },

    #[error("No images found for split '{split}' under {dir:?}")]
    EmptySplit { split: String, dir: PathBuf },

    #[error("Batch index {index} out of range ({len} batches)")]
    BatchOutOfRange { index: usize, len: usize },

    #[error("Unsupported image layout in {path:?}: {detail}")]
    UnsupportedImage { path: PathBuf, detail: String },

    #[error("Failed to read tensor data: {0}")]
    TensorData(String),
}
