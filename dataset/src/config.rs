use burn::prelude::Config;

use crate::error::DatasetError;

/// How images are brought to `load_size` when they are read.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum ResizeOrCrop {
    /// Use images as stored. They must already be `load_size` square when a size is declared.
    None,
    /// Resize source and target to `load_size` x `load_size`.
    Resize,
}

#[derive(Config, Debug)]
pub struct LoadConfig {
    /// Root folder holding `input/<split>` and `<target>/<split>` image folders.
    pub dataroot: String,

    /// Name of the target stain folder, e.g. "nuclei" or "cyto".
    #[config(default = "String::from(\"nuclei\")")]
    pub target: String,

    /// Bit depth of the stored images (8 or 16).
    #[config(default = 16)]
    pub data_type: u32,

    /// Side length of the square images fed to the model.
    pub load_size: Option<u32>,

    #[config(default = "ResizeOrCrop::None")]
    pub resize_or_crop: ResizeOrCrop,

    /// Number of source channels.
    #[config(default = 1)]
    pub input_nc: usize,

    /// Number of target channels.
    #[config(default = 1)]
    pub output_nc: usize,

    #[config(default = 8)]
    pub batch_size: usize,

    /// Keep the stored order instead of shuffling every epoch.
    #[config(default = false)]
    pub serial_batches: bool,

    /// Disable random horizontal flips.
    #[config(default = false)]
    pub no_flip: bool,

    /// Max nr. of examples to load.
    pub max_examples: Option<usize>,

    #[config(default = 42)]
    pub seed: u64,
}

impl LoadConfig {
    /// Settings for evaluation streams: one example per batch, stored order, no flips.
    pub fn for_evaluation(self) -> Self {
        self.with_batch_size(1)
            .with_serial_batches(true)
            .with_no_flip(true)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.dataroot.is_empty() {
            return Err(DatasetError::Config("dataroot must be set".into()));
        }
        if self.target.is_empty() {
            return Err(DatasetError::Config("target stain must be named".into()));
        }
        if self.data_type != 8 && self.data_type != 16 {
            return Err(DatasetError::Config(format!(
                "data_type must be 8 or 16, got {}",
                self.data_type
            )));
        }
        if self.input_nc == 0 || self.output_nc == 0 {
            return Err(DatasetError::Config(
                "input_nc and output_nc must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(DatasetError::Config("batch_size must be at least 1".into()));
        }
        if self.load_size == Some(0) {
            return Err(DatasetError::Config("load_size must be positive".into()));
        }
        if self.resize_or_crop == ResizeOrCrop::Resize && self.load_size.is_none() {
            return Err(DatasetError::Config(
                "resize_or_crop = Resize needs a load_size".into(),
            ));
        }
        if self.max_examples == Some(0) {
            return Err(DatasetError::Config("max_examples must be positive".into()));
        }
        Ok(())
    }

    /// Largest value a stored pixel can take.
    pub fn max_value(&self) -> f32 {
        if self.data_type == 8 { 255.0 } else { 65535.0 }
    }
}
