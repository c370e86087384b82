use std::fmt;
use std::path::Path;

use burn::prelude::{Backend, Tensor, TensorData};
use image::DynamicImage;
use image::imageops::FilterType;

use crate::error::{DatasetError, Result};

/// Named partition of the dataset on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One paired observation. Images are `[H, W, C]` in `[0, 1]`.
#[derive(Clone, Debug)]
pub struct Example<B: Backend> {
    pub id: String,
    pub source: Tensor<B, 3>,
    pub target: Tensor<B, 3>,
}

impl<B: Backend> Example<B> {
    pub fn new(id: impl Into<String>, source: Tensor<B, 3>, target: Tensor<B, 3>) -> Result<Self> {
        let id = id.into();
        let [sh, sw, _] = source.dims();
        let [th, tw, _] = target.dims();
        if (sh, sw) != (th, tw) {
            return Err(DatasetError::ShapeMismatch {
                id,
                detail: format!("source is {sh}x{sw}, target is {th}x{tw}"),
            });
        }
        Ok(Self { id, source, target })
    }
}

/// Examples of identical shape stacked along a leading batch axis, `[N, H, W, C]`.
#[derive(Clone, Debug)]
pub struct StainBatch<B: Backend> {
    pub ids: Vec<String>,
    pub source: Tensor<B, 4>,
    pub target: Tensor<B, 4>,
}

impl<B: Backend> StainBatch<B> {
    pub fn from_examples(examples: Vec<Example<B>>) -> Result<Self> {
        let Some(first) = examples.first() else {
            return Err(DatasetError::ShapeMismatch {
                id: String::from("<empty batch>"),
                detail: "a batch needs at least one example".into(),
            });
        };
        let source_dims = first.source.dims();
        let target_dims = first.target.dims();
        for example in &examples[1..] {
            if example.source.dims() != source_dims || example.target.dims() != target_dims {
                return Err(DatasetError::ShapeMismatch {
                    id: example.id.clone(),
                    detail: format!(
                        "expected source {source_dims:?} / target {target_dims:?}, got {:?} / {:?}",
                        example.source.dims(),
                        example.target.dims()
                    ),
                });
            }
        }

        let mut ids = Vec::with_capacity(examples.len());
        let mut sources = Vec::with_capacity(examples.len());
        let mut targets = Vec::with_capacity(examples.len());
        for example in examples {
            ids.push(example.id);
            sources.push(example.source);
            targets.push(example.target);
        }
        Ok(Self {
            ids,
            source: Tensor::stack(sources, 0),
            target: Tensor::stack(targets, 0),
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Spatial size `(height, width)` shared by every example in the batch.
    pub fn spatial_dims(&self) -> (usize, usize) {
        let [_, h, w, _] = self.source.dims();
        (h, w)
    }
}

/// Take image `index` out of a `[N, H, W, C]` stack.
pub fn image_at<B: Backend>(stack: &Tensor<B, 4>, index: usize) -> Tensor<B, 3> {
    let [_, h, w, c] = stack.dims();
    stack
        .clone()
        .slice([index..index + 1, 0..h, 0..w, 0..c])
        .squeeze(0)
}

pub fn load_image(path: &Path) -> Result<DynamicImage> {
    Ok(image::open(path)?)
}

/// Bits per channel of a decoded image.
pub fn bit_depth(image: &DynamicImage) -> u32 {
    let color = image.color();
    (color.bits_per_pixel() as u32) / (color.channel_count() as u32)
}

pub fn resize_square(image: DynamicImage, size: u32) -> DynamicImage {
    if image.width() == size && image.height() == size {
        image
    } else {
        image.resize_exact(size, size, FilterType::Triangle)
    }
}

// Converts an image to a floating point [H, W, C] tensor in [0, 1].
pub fn image_to_tensor<B: Backend>(
    image: &DynamicImage,
    channels: usize,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let stored = image.color().channel_count() as usize;
    let data = match (channels, stored) {
        (1, 1) => TensorData::new(image.to_luma32f().into_raw(), [h, w, 1]),
        (3, 3) => TensorData::new(image.to_rgb32f().into_raw(), [h, w, 3]),
        _ => {
            return Err(DatasetError::ShapeMismatch {
                id: String::from("<image>"),
                detail: format!("expected {channels} channel(s), image has {stored}"),
            });
        }
    };
    Ok(Tensor::from_data(data, device))
}

/// Copy a tensor to the host as `f32` values in row-major order.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DatasetError::TensorData(format!("{e:?}")))
}
