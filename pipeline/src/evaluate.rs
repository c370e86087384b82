use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use dataset::{DatasetError, Filesystem, TIFF_SUFFIXES, image_to_tensor, load_image, stem_of};
use image::DynamicImage;
use serde::Serialize;
use train::eval::{PixelScore, pixel_metrics};
use train::instance::{InstanceScore, LabelMask, MaskPair, score_thresholds};
use train::stats::Summary;

use crate::error::{PipelineError, Result};

/// Suffixes of the label masks written by the segmentation service.
pub const MASK_SUFFIXES: &[&str] = &["_cp_masks.tif", "_cp_masks.tiff"];

/// Suffixes of the uncertainty previews written by the sampler.
const UNCERTAINTY_SUFFIXES: &[&str] = &["_uncertainty.tif", "_uncertainty.tiff"];

/// Which files of a folder take part in a pairing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// TIFF images, without segmentation masks or sampler outputs stored next to them.
    Images,
    /// Segmentation masks only.
    Masks,
}

impl FileKind {
    fn list(&self, dir: &Path) -> Vec<PathBuf> {
        let fs = Filesystem::new(dir.to_path_buf());
        match self {
            Self::Images => fs
                .files_ending_in(TIFF_SUFFIXES)
                .into_iter()
                .filter(|path| !is_mask(path) && !is_sampler_output(path))
                .collect(),
            Self::Masks => fs.files_ending_in(MASK_SUFFIXES),
        }
    }
}

fn is_mask(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy().to_lowercase();
            MASK_SUFFIXES.iter().any(|s| name.ends_with(s))
        })
        .unwrap_or(false)
}

/// Uncertainty previews and individual samples kept below a results folder.
fn is_sampler_output(path: &Path) -> bool {
    path.file_name()
        .map(|name| {
            let name = name.to_string_lossy().to_lowercase();
            name.starts_with("sample_") || UNCERTAINTY_SUFFIXES.iter().any(|s| name.ends_with(s))
        })
        .unwrap_or(false)
}

/// Example identifier of an image or mask file.
pub fn example_id(path: &Path) -> String {
    let stem = stem_of(path);
    stem.strip_suffix("_cp_masks").map(str::to_string).unwrap_or(stem)
}

/// Pair the files of two folders by sorted position. Unequal counts are fatal.
pub fn pair_files(left: &Path, right: &Path, kind: FileKind) -> Result<Vec<(PathBuf, PathBuf)>> {
    let left_files = kind.list(left);
    let right_files = kind.list(right);
    if left_files.len() != right_files.len() {
        return Err(PipelineError::CountMismatch {
            what: format!("{kind:?}"),
            left_dir: left.to_path_buf(),
            left: left_files.len(),
            right_dir: right.to_path_buf(),
            right: right_files.len(),
        });
    }
    Ok(left_files.into_iter().zip(right_files).collect())
}

/// Check that predictions, targets and inputs line up one to one.
pub fn check_counts(predictions: &Path, targets: &Path, inputs: &Path) -> Result<usize> {
    let pairs = pair_files(predictions, targets, FileKind::Images)?;
    pair_files(predictions, inputs, FileKind::Images)?;
    Ok(pairs.len())
}

/// Pixel metrics of every prediction against the target at the same sorted position.
pub fn score_pixel_dirs<B: Backend>(
    predictions: &Path,
    targets: &Path,
    data_range: f32,
    device: &B::Device,
) -> Result<Vec<PixelScore>> {
    let pairs = pair_files(predictions, targets, FileKind::Images)?;
    log::info!("Scoring {} prediction/target pairs", pairs.len());

    pairs
        .iter()
        .map(|(prediction_path, target_path)| -> Result<PixelScore> {
            let prediction = load_image(prediction_path)?;
            let target = load_image(target_path)?;
            let channels = target.color().channel_count() as usize;
            let id = example_id(prediction_path);
            let as_tensor = |image: &DynamicImage, path: &Path| {
                image_to_tensor::<B>(image, channels, device).map_err(|e| match e {
                    DatasetError::ShapeMismatch { detail, .. } => {
                        PipelineError::Shape(format!("{path:?}: {detail}"))
                    }
                    other => other.into(),
                })
            };
            let metrics = pixel_metrics(
                as_tensor(&target, target_path)?,
                as_tensor(&prediction, prediction_path)?,
                data_range,
            )?;
            Ok(PixelScore::new(id, metrics))
        })
        .collect()
}

fn load_mask(path: &Path) -> Result<LabelMask> {
    Ok(LabelMask::from_image(&load_image(path)?)?)
}

/// Instance metrics of every predicted mask against the target mask at the same sorted
/// position, one row set per threshold.
pub fn score_mask_dirs(
    predicted_masks: &Path,
    target_masks: &Path,
    thresholds: &[f32],
    model: &str,
) -> Result<Vec<Vec<InstanceScore>>> {
    let pairs = pair_files(predicted_masks, target_masks, FileKind::Masks)?
        .into_iter()
        .map(|(predicted, truth)| -> Result<MaskPair> {
            Ok(MaskPair {
                id: example_id(&predicted),
                predicted: load_mask(&predicted)?,
                ground_truth: load_mask(&truth)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    log::info!(
        "Scoring {} mask pairs at thresholds {thresholds:?}",
        pairs.len()
    );
    Ok(score_thresholds(&pairs, thresholds, model)?)
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct PixelSummary {
    pub pearson: Summary,
    pub ssim: Summary,
    pub psnr: Summary,
}

pub fn summarize_pixels(rows: &[PixelScore]) -> PixelSummary {
    PixelSummary {
        pearson: Summary::of(rows.iter().map(|r| r.pearson)),
        ssim: Summary::of(rows.iter().map(|r| r.ssim)),
        psnr: Summary::of(rows.iter().map(|r| r.psnr)),
    }
}

/// Write rows as CSV with a header line.
pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    log::info!("Wrote {} rows to {path:?}", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn masks_are_kept_apart_from_images() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.tif", "a_cp_masks.tif", "b.tiff", "b_cp_masks.tif", "notes.txt"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        let images = FileKind::Images.list(tmp.path());
        let masks = FileKind::Masks.list(tmp.path());
        assert_eq!(images.len(), 2);
        assert_eq!(masks.len(), 2);
        assert_eq!(example_id(&masks[0]), "a");
        assert_eq!(example_id(&images[1]), "b");
    }

    #[test]
    fn sampler_outputs_are_not_predictions() {
        let tmp = tempfile::tempdir().unwrap();
        let samples = tmp.path().join("samples");
        fs::create_dir_all(samples.join("ex0")).unwrap();
        for path in [
            tmp.path().join("ex0.tiff"),
            tmp.path().join("ex1.tiff"),
            samples.join("ex0_uncertainty.tiff"),
            samples.join("ex0_uncertainty.json"),
            samples.join("ex0").join("sample_000.tiff"),
            samples.join("ex0").join("sample_001.tiff"),
        ] {
            fs::write(path, b"").unwrap();
        }
        let images = FileKind::Images.list(tmp.path());
        let ids: Vec<String> = images.iter().map(|path| example_id(path)).collect();
        assert_eq!(ids, ["ex0", "ex1"]);
    }

    #[test]
    fn count_mismatch_is_fatal() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("x.tif"), b"").unwrap();
        fs::write(a.path().join("y.tif"), b"").unwrap();
        fs::write(b.path().join("x.tif"), b"").unwrap();
        assert!(matches!(
            pair_files(a.path(), b.path(), FileKind::Images),
            Err(PipelineError::CountMismatch { left: 2, right: 1, .. })
        ));
    }

    #[test]
    fn writes_instance_table_with_named_columns() {
        let tmp = tempfile::tempdir().unwrap();
        let mask = LabelMask::new(2, 2, vec![0, 1, 1, 2]).unwrap();
        let pairs = vec![MaskPair {
            id: "img".into(),
            predicted: mask.clone(),
            ground_truth: mask,
        }];
        let rows = score_thresholds(&pairs, &[0.5], "Pix2PixHD").unwrap();
        let path = tmp.path().join("instance.csv");
        write_table(&path, &rows[0]).unwrap();

        let content = fs::read_to_string(path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("Model,Image,GT_Cell_Count,Threshold,F1,IoU,TP,FP,FN,Precision,Recall")
        );
        assert_eq!(lines.next(), Some("Pix2PixHD,img,2,0.5,1.0,1.0,2,0,0,1.0,1.0"));
    }
}
