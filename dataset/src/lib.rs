mod config;
mod error;
mod example;
mod filesystem;
mod loader;

pub use config::{LoadConfig, ResizeOrCrop};
pub use error::{DatasetError, Result};
pub use example::{
    Example, Split, StainBatch, bit_depth, image_at, image_to_tensor, load_image, resize_square,
    tensor_to_vec,
};
pub use filesystem::{Filesystem, TIFF_SUFFIXES, pair_sorted, stem_of};
pub use loader::{BatchSource, FolderDataset, InMemorySource};
