use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{PipelineError, Result};

/// An instance segmentation service that writes one `*_cp_masks.tif` per image of a folder,
/// next to the image.
pub trait Segmenter {
    fn segment_dir(&self, dir: &Path, model: &str, channel: u32) -> anyhow::Result<()>;
}

/// Runs the cellpose command line through a python interpreter.
#[derive(Clone, Debug)]
pub struct CellposeCli {
    python: PathBuf,
}

impl Default for CellposeCli {
    fn default() -> Self {
        Self::new("python")
    }
}

impl CellposeCli {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn args(dir: &Path, model: &str, channel: u32) -> Vec<OsString> {
        vec![
            "-m".into(),
            "cellpose".into(),
            "--dir".into(),
            dir.as_os_str().to_owned(),
            "--pretrained_model".into(),
            model.into(),
            "--chan".into(),
            channel.to_string().into(),
            "--save_tiff".into(),
        ]
    }
}

impl Segmenter for CellposeCli {
    fn segment_dir(&self, dir: &Path, model: &str, channel: u32) -> anyhow::Result<()> {
        log::info!("Segmenting {dir:?} with cellpose model '{model}', channel {channel}");
        let output = Command::new(&self.python)
            .args(Self::args(dir, model, channel))
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            anyhow::bail!(
                "cellpose exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            );
        }
        Ok(())
    }
}

/// Segment one folder, mapping service failures to [`PipelineError::Segmentation`].
pub fn segment(segmenter: &dyn Segmenter, dir: &Path, model: &str, channel: u32) -> Result<()> {
    if !dir.is_dir() {
        return Err(PipelineError::Segmentation(format!("{dir:?} is not a folder")));
    }
    segmenter
        .segment_dir(dir, model, channel)
        .map_err(|e| PipelineError::Segmentation(format!("{dir:?}: {e:#}")))
}

/// Segment the prediction folder and the target folder with the same model.
pub fn segment_pair(
    segmenter: &dyn Segmenter,
    predictions: &Path,
    targets: &Path,
    model: &str,
    channel: u32,
) -> Result<()> {
    segment(segmenter, predictions, model, channel)?;
    segment(segmenter, targets, model, channel)
}
