use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use burn::tensor::Tensor;
use dataset::tensor_to_vec;
use image::{DynamicImage, ImageBuffer, Luma, Rgb};

use crate::error::{PipelineError, Result};
use crate::sampling::UncertaintyMap;

fn to_u16(values: &[f32], scale: f32) -> Vec<u16> {
    values
        .iter()
        .map(|v| {
            let v = if v.is_finite() { (v / scale).clamp(0.0, 1.0) } else { 0.0 };
            (v * u16::MAX as f32).round() as u16
        })
        .collect()
}

fn encode(values: Vec<u16>, height: usize, width: usize, channels: usize) -> Result<DynamicImage> {
    let (w, h) = (width as u32, height as u32);
    let image = match channels {
        1 => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, values).map(DynamicImage::ImageLuma16),
        3 => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, values).map(DynamicImage::ImageRgb16),
        _ => {
            return Err(PipelineError::Shape(format!(
                "cannot write an image with {channels} channels"
            )));
        }
    };
    image.ok_or_else(|| {
        PipelineError::Shape(format!("pixel buffer does not fit {width}x{height}x{channels}"))
    })
}

fn write_image(image: &DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    image.save(path)?;
    Ok(())
}

/// Write an `[H, W, C]` image in `[0, 1]` as a 16-bit TIFF.
pub fn save_prediction<B: Backend>(image: Tensor<B, 3>, path: &Path) -> Result<()> {
    let [h, w, c] = image.dims();
    let values = tensor_to_vec(image)?;
    log::debug!("Saving prediction to {path:?}");
    write_image(&encode(to_u16(&values, 1.0), h, w, c)?, path)
}

/// Write `<dir>/<id>_uncertainty.json` and a normalized `<dir>/<id>_uncertainty.tiff` preview.
///
/// Returns the path of the JSON file.
pub fn save_uncertainty(map: &UncertaintyMap, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let json_path = dir.join(format!("{}_uncertainty.json", map.id));
    let file = fs::File::create(&json_path)?;
    serde_json::to_writer(std::io::BufWriter::new(file), map)?;

    let [h, w, c] = map.shape;
    let scale = if map.max > 0.0 { map.max } else { 1.0 };
    let preview = encode(to_u16(&map.variance, scale), h, w, c)?;
    write_image(&preview, &dir.join(format!("{}_uncertainty.tiff", map.id)))?;
    Ok(json_path)
}
