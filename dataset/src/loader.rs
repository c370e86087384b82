use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{LoadConfig, ResizeOrCrop};
use crate::error::{DatasetError, Result};
use crate::example::{
    Example, Split, StainBatch, bit_depth, image_to_tensor, load_image, resize_square,
};
use crate::filesystem::{Filesystem, TIFF_SUFFIXES, pair_sorted, stem_of};

/// A sized, ordered stream of batches for one split.
///
/// Batches are addressed by their position in the current epoch. Implementations may reorder
/// their examples between epochs in `start_epoch`, never while an epoch is running.
pub trait BatchSource<B: Backend> {
    fn split(&self) -> Split;

    fn num_batches(&self) -> usize;

    /// Called by the consumer before the first batch of every epoch.
    fn start_epoch(&mut self, _epoch: usize) {}

    fn load_batch(&self, index: usize) -> Result<StainBatch<B>>;
}

/// Batches over examples that already live in memory, in insertion order.
pub struct InMemorySource<B: Backend> {
    split: Split,
    examples: Vec<Example<B>>,
    batch_size: usize,
}

impl<B: Backend> InMemorySource<B> {
    pub fn new(split: Split, examples: Vec<Example<B>>, batch_size: usize) -> Self {
        Self {
            split,
            examples,
            batch_size: batch_size.max(1),
        }
    }
}

impl<B: Backend> BatchSource<B> for InMemorySource<B> {
    fn split(&self) -> Split {
        self.split
    }

    fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    fn load_batch(&self, index: usize) -> Result<StainBatch<B>> {
        let len = self.num_batches();
        if index >= len {
            return Err(DatasetError::BatchOutOfRange { index, len });
        }
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.examples.len());
        StainBatch::from_examples(self.examples[start..end].to_vec())
    }
}

/// Source/target TIFF pairs read from `<dataroot>/input/<split>` and `<dataroot>/<target>/<split>`.
pub struct FolderDataset<B: Backend> {
    config: LoadConfig,
    split: Split,
    pairs: Vec<(PathBuf, PathBuf)>,
    order: Vec<usize>,
    flips: Vec<bool>,
    device: B::Device,
}

impl<B: Backend> FolderDataset<B> {
    pub fn open(config: LoadConfig, split: Split, device: &B::Device) -> Result<Self> {
        config.validate()?;

        let root = Path::new(&config.dataroot);
        let source_dir = root.join("input").join(split.as_str());
        let target_dir = root.join(&config.target).join(split.as_str());
        let mut pairs = pair_sorted(
            &Filesystem::new(source_dir.clone()),
            &Filesystem::new(target_dir),
            TIFF_SUFFIXES,
        )?;
        if pairs.is_empty() {
            return Err(DatasetError::EmptySplit {
                split: split.to_string(),
                dir: source_dir,
            });
        }
        if let Some(max) = config.max_examples {
            pairs.truncate(max);
        }

        let n = pairs.len();
        let dataset = Self {
            order: (0..n).collect(),
            flips: vec![false; n],
            config,
            split,
            pairs,
            device: device.clone(),
        };
        dataset.check_declared_layout()?;

        log::info!(
            "Loaded {} split: {} examples, {} batches of {}",
            split,
            n,
            dataset.num_batches(),
            dataset.config.batch_size
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    // Compare the first pair on disk against the declared channel counts, bit depth and size.
    fn check_declared_layout(&self) -> Result<()> {
        let (source_path, target_path) = &self.pairs[0];
        for (path, channels) in [
            (source_path, self.config.input_nc),
            (target_path, self.config.output_nc),
        ] {
            let image = load_image(path)?;
            let stored = image.color().channel_count() as usize;
            if stored != channels {
                return Err(DatasetError::Config(format!(
                    "declared {channels} channel(s) but {path:?} has {stored}"
                )));
            }
            let depth = bit_depth(&image);
            if depth != self.config.data_type {
                return Err(DatasetError::Config(format!(
                    "declared {}-bit data but {path:?} is {depth}-bit",
                    self.config.data_type
                )));
            }
            if let (ResizeOrCrop::None, Some(size)) =
                (&self.config.resize_or_crop, self.config.load_size)
            {
                if image.width() != size || image.height() != size {
                    return Err(DatasetError::Config(format!(
                        "load_size {size} but {path:?} is {}x{} and resizing is disabled",
                        image.width(),
                        image.height()
                    )));
                }
            }
        }
        Ok(())
    }

    fn load_example(&self, position: usize) -> Result<Example<B>> {
        let index = self.order[position];
        let (source_path, target_path) = &self.pairs[index];
        let flip = self.flips[index];

        let prepare = |path: &Path| -> Result<_> {
            let mut image = load_image(path)?;
            if let (ResizeOrCrop::Resize, Some(size)) =
                (&self.config.resize_or_crop, self.config.load_size)
            {
                image = resize_square(image, size);
            }
            if flip {
                image = image.fliph();
            }
            Ok(image)
        };

        let id = stem_of(source_path);
        let source = image_to_tensor(&prepare(source_path)?, self.config.input_nc, &self.device)
            .map_err(|e| with_id(e, &id))?;
        let target = image_to_tensor(&prepare(target_path)?, self.config.output_nc, &self.device)
            .map_err(|e| with_id(e, &id))?;
        Example::new(id, source, target)
    }
}

fn with_id(err: DatasetError, id: &str) -> DatasetError {
    match err {
        DatasetError::ShapeMismatch { detail, .. } => DatasetError::ShapeMismatch {
            id: id.to_string(),
            detail,
        },
        other => other,
    }
}

impl<B: Backend> BatchSource<B> for FolderDataset<B> {
    fn split(&self) -> Split {
        self.split
    }

    fn num_batches(&self) -> usize {
        self.pairs.len().div_ceil(self.config.batch_size)
    }

    fn start_epoch(&mut self, epoch: usize) {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
        // Each epoch's order depends on the seed and the epoch only, so a resumed run sees the
        // same batches as the interrupted one.
        self.order = (0..self.pairs.len()).collect();
        if !self.config.serial_batches {
            self.order.shuffle(&mut rng);
        }
        if !self.config.no_flip && self.split == Split::Train {
            for flip in self.flips.iter_mut() {
                *flip = rng.random_bool(0.5);
            }
        }
    }

    fn load_batch(&self, index: usize) -> Result<StainBatch<B>> {
        let len = self.num_batches();
        if index >= len {
            return Err(DatasetError::BatchOutOfRange { index, len });
        }
        let start = index * self.config.batch_size;
        let end = (start + self.config.batch_size).min(self.pairs.len());
        let examples = (start..end)
            .map(|position| self.load_example(position))
            .collect::<Result<Vec<_>>>()?;
        StainBatch::from_examples(examples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;
    use image::{DynamicImage, ImageBuffer, Luma};
    use std::fs;

    type B = NdArray<f32>;

    fn write_gray16(path: &Path, size: u32, value: u16) {
        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(size, size, Luma([value]));
        DynamicImage::ImageLuma16(buffer).save(path).unwrap();
    }

    fn make_split(root: &Path, split: &str, count: usize, size: u32) {
        let input = root.join("input").join(split);
        let target = root.join("nuclei").join(split);
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&target).unwrap();
        for i in 0..count {
            write_gray16(&input.join(format!("fov_{i}.tiff")), size, 1000 * i as u16);
            write_gray16(&target.join(format!("fov_{i}.tiff")), size, 500 * i as u16);
        }
    }

    #[test]
    fn folder_dataset_batches_in_stored_order() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path(), "test", 3, 8);

        let config = LoadConfig::new(dir.path().to_string_lossy().into_owned())
            .with_load_size(Some(8))
            .for_evaluation()
            .with_batch_size(2);
        let mut dataset =
            FolderDataset::<B>::open(config, Split::Test, &Default::default()).unwrap();
        dataset.start_epoch(1);

        assert_eq!(dataset.num_batches(), 2);
        let first = dataset.load_batch(0).unwrap();
        assert_eq!(first.ids, vec!["fov_0", "fov_1"]);
        assert_eq!(first.source.dims(), [2, 8, 8, 1]);
        let last = dataset.load_batch(1).unwrap();
        assert_eq!(last.ids, vec!["fov_2"]);
        assert!(dataset.load_batch(2).is_err());
    }

    #[test]
    fn declared_channels_must_match_data() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path(), "train", 2, 4);

        let config = LoadConfig::new(dir.path().to_string_lossy().into_owned()).with_input_nc(3);
        let err = FolderDataset::<B>::open(config, Split::Train, &Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, DatasetError::Config(_)));
    }

    #[test]
    fn declared_size_must_match_without_resizing() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path(), "train", 1, 4);

        let root = dir.path().to_string_lossy().into_owned();
        let config = LoadConfig::new(root.clone()).with_load_size(Some(8));
        assert!(FolderDataset::<B>::open(config, Split::Train, &Default::default()).is_err());

        let config = LoadConfig::new(root)
            .with_load_size(Some(8))
            .with_resize_or_crop(ResizeOrCrop::Resize);
        let dataset = FolderDataset::<B>::open(config, Split::Train, &Default::default()).unwrap();
        assert_eq!(dataset.load_batch(0).unwrap().spatial_dims(), (8, 8));
    }

    #[test]
    fn mismatched_counts_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path(), "val", 2, 4);
        fs::remove_file(dir.path().join("nuclei/val/fov_1.tiff")).unwrap();

        let config = LoadConfig::new(dir.path().to_string_lossy().into_owned());
        let err = FolderDataset::<B>::open(config, Split::Val, &Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, DatasetError::CountMismatch { .. }));
    }

    #[test]
    fn shuffling_keeps_every_example() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path(), "train", 5, 4);

        let config = LoadConfig::new(dir.path().to_string_lossy().into_owned()).with_batch_size(1);
        let mut dataset =
            FolderDataset::<B>::open(config, Split::Train, &Default::default()).unwrap();
        dataset.start_epoch(3);
        let mut ids: Vec<String> = (0..dataset.num_batches())
            .flat_map(|i| dataset.load_batch(i).unwrap().ids)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["fov_0", "fov_1", "fov_2", "fov_3", "fov_4"]);
    }

    #[test]
    fn epoch_order_does_not_depend_on_earlier_epochs() {
        let dir = tempfile::tempdir().unwrap();
        make_split(dir.path(), "train", 8, 4);
        let config = LoadConfig::new(dir.path().to_string_lossy().into_owned()).with_batch_size(1);
        let open = || {
            FolderDataset::<B>::open(config.clone(), Split::Train, &Default::default()).unwrap()
        };
        let ids = |dataset: &FolderDataset<B>| -> Vec<String> {
            (0..dataset.num_batches())
                .flat_map(|i| dataset.load_batch(i).unwrap().ids)
                .collect()
        };

        let mut continuous = open();
        continuous.start_epoch(1);
        continuous.start_epoch(2);
        let mut resumed = open();
        resumed.start_epoch(2);
        assert_eq!(ids(&continuous), ids(&resumed));

        continuous.start_epoch(5);
        continuous.start_epoch(2);
        assert_eq!(ids(&continuous), ids(&resumed));
    }

    #[test]
    fn in_memory_source_keeps_partial_last_batch() {
        let device = Default::default();
        let examples = (0..5)
            .map(|i| {
                Example::new(
                    format!("{i}"),
                    Tensor::<B, 3>::zeros([2, 2, 1], &device),
                    Tensor::<B, 3>::zeros([2, 2, 1], &device),
                )
                .unwrap()
            })
            .collect();
        let source = InMemorySource::new(Split::Val, examples, 2);
        assert_eq!(source.num_batches(), 3);
        assert_eq!(source.load_batch(2).unwrap().len(), 1);
    }
}
