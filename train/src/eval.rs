use burn::prelude::Backend;
use burn::tensor::{ElementConversion, Tensor};
use dataset::image_at;
use serde::Serialize;
use tracing::trace_span;

use crate::error::{Result, TrainError};
use crate::ssim::{Ssim, window_for};

/// Pixel level agreement between a reference image and a candidate.
///
/// Values may be non-finite: `pearson` is NaN when either image is constant and `psnr` is
/// infinite for identical images. Aggregation has to skip them, see [`crate::stats::Summary`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PixelMetrics {
    pub pearson: f32,
    pub ssim: f32,
    pub psnr: f32,
}

/// One row of the pixel metric table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PixelScore {
    pub image: String,
    pub pearson: f32,
    pub ssim: f32,
    pub psnr: f32,
}

impl PixelScore {
    pub fn new(image: impl Into<String>, metrics: PixelMetrics) -> Self {
        Self {
            image: image.into(),
            pearson: metrics.pearson,
            ssim: metrics.ssim,
            psnr: metrics.psnr,
        }
    }

    pub fn metrics(&self) -> PixelMetrics {
        PixelMetrics {
            pearson: self.pearson,
            ssim: self.ssim,
            psnr: self.psnr,
        }
    }
}

fn check_inputs<B: Backend>(
    reference: &Tensor<B, 3>,
    candidate: &Tensor<B, 3>,
    data_range: f32,
) -> Result<()> {
    if reference.dims() != candidate.dims() {
        return Err(TrainError::ShapeMismatch(format!(
            "reference is {:?}, candidate is {:?}",
            reference.dims(),
            candidate.dims()
        )));
    }
    if !(data_range.is_finite() && data_range > 0.0) {
        return Err(TrainError::InvalidDataRange(data_range));
    }
    Ok(())
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Product-moment correlation of the flattened images.
pub fn pearson<B: Backend>(reference: Tensor<B, 3>, candidate: Tensor<B, 3>) -> f32 {
    let n = reference.dims().iter().product::<usize>();
    let x = reference.reshape([n]);
    let y = candidate.reshape([n]);

    // A constant image has no defined correlation. Checked exactly, the centered
    // variance of a constant can come out as rounding noise.
    let constant = |t: &Tensor<B, 1>| scalar(t.clone().max()) == scalar(t.clone().min());
    if constant(&x) || constant(&y) {
        return f32::NAN;
    }

    let mean_x = scalar(x.clone().mean()) as f32;
    let mean_y = scalar(y.clone().mean()) as f32;
    let x = x - mean_x;
    let y = y - mean_y;
    let cov = scalar((x.clone() * y.clone()).mean());
    let var_x = scalar((x.clone() * x).mean());
    let var_y = scalar((y.clone() * y).mean());
    let denom = (var_x * var_y).sqrt();
    if denom > 0.0 {
        (cov / denom) as f32
    } else {
        f32::NAN
    }
}

/// Peak signal to noise ratio in dB. Infinite when the images are identical.
pub fn psnr<B: Backend>(reference: Tensor<B, 3>, candidate: Tensor<B, 3>, data_range: f32) -> f32 {
    let mse = scalar((reference - candidate).powi_scalar(2).mean());
    if mse == 0.0 {
        return f32::INFINITY;
    }
    let range = data_range as f64;
    (10.0 * (range * range / mse).log10()) as f32
}

/// Mean structural similarity over the region where the gaussian window fits.
pub fn ssim<B: Backend>(reference: Tensor<B, 3>, candidate: Tensor<B, 3>, data_range: f32) -> f32 {
    let [h, w, c] = reference.dims();
    let measure = Ssim::new(window_for(h, w), c, data_range, &reference.device());
    scalar(measure.ssim(reference, candidate).mean()) as f32
}

/// Pearson, SSIM and PSNR of `candidate` against `reference`, both `[H, W, C]`.
pub fn pixel_metrics<B: Backend>(
    reference: Tensor<B, 3>,
    candidate: Tensor<B, 3>,
    data_range: f32,
) -> Result<PixelMetrics> {
    check_inputs(&reference, &candidate, data_range)?;
    let _span = trace_span!("Pixel metrics").entered();

    Ok(PixelMetrics {
        pearson: pearson(reference.clone(), candidate.clone()),
        ssim: ssim(reference.clone(), candidate.clone(), data_range),
        psnr: psnr(reference, candidate, data_range),
    })
}

/// Score every example of a `[N, H, W, C]` stack of targets against the matching predictions.
pub fn score_batch<B: Backend>(
    ids: &[String],
    targets: &Tensor<B, 4>,
    predictions: &Tensor<B, 4>,
    data_range: f32,
) -> Result<Vec<PixelScore>> {
    if targets.dims() != predictions.dims() {
        return Err(TrainError::ShapeMismatch(format!(
            "targets are {:?}, predictions are {:?}",
            targets.dims(),
            predictions.dims()
        )));
    }
    if ids.len() != targets.dims()[0] {
        return Err(TrainError::ShapeMismatch(format!(
            "{} ids for a batch of {}",
            ids.len(),
            targets.dims()[0]
        )));
    }
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let metrics =
                pixel_metrics(image_at(targets, i), image_at(predictions, i), data_range)?;
            Ok(PixelScore::new(id.clone(), metrics))
        })
        .collect()
}
