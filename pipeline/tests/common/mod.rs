#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use burn::backend::NdArray;
use burn::prelude::Backend;
use burn::tensor::{Distribution, Tensor};
use dataset::{Example, StainBatch};
use pipeline::ScalarSink;
use train::model::{Network, TranslationModel, ValidationOutput};
use train::msg::{D_FAKE, D_REAL, G_GAN, G_GAN_FEAT, LossTerms};

pub type B = NdArray<f32>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub network: Network,
    pub ids: Vec<String>,
}

/// A stand-in translation model that records every call.
///
/// The prediction is half the mean source intensity plus a quarter. With stochastic inference
/// on, the offset is dropped or doubled at random per pixel.
pub struct ScriptedModel<B: Backend> {
    pub steps: Vec<Step>,
    pub learning_rates: Vec<f64>,
    pub loaded: Vec<PathBuf>,
    pub saved: RefCell<Vec<PathBuf>>,
    pub forward_flags: RefCell<Vec<bool>>,
    pub validated: RefCell<Vec<String>>,
    /// Fail the optimization step of any batch holding this example.
    pub fail_on: Option<String>,
    pub stochastic: bool,
    pub _backend: PhantomData<B>,
}

impl<B: Backend> Default for ScriptedModel<B> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            learning_rates: Vec::new(),
            loaded: Vec::new(),
            saved: RefCell::new(Vec::new()),
            forward_flags: RefCell::new(Vec::new()),
            validated: RefCell::new(Vec::new()),
            fail_on: None,
            stochastic: false,
            _backend: PhantomData,
        }
    }
}

fn terms(values: &[(&str, f32)]) -> LossTerms {
    values.iter().map(|&(k, v)| (k.to_string(), v)).collect()
}

impl<B: Backend> TranslationModel<B> for ScriptedModel<B> {
    fn forward(&self, source: Tensor<B, 4>) -> anyhow::Result<Tensor<B, 4>> {
        self.forward_flags.borrow_mut().push(self.stochastic);
        let base = source.mean_dim(3) * 0.5;
        if self.stochastic {
            let keep =
                Tensor::<B, 4>::random(base.shape(), Distribution::Bernoulli(0.5), &base.device());
            Ok(base + keep * 0.5)
        } else {
            Ok(base + 0.25)
        }
    }

    fn validation_step(&self, batch: &StainBatch<B>) -> anyhow::Result<ValidationOutput<B>> {
        self.validated.borrow_mut().extend(batch.ids.iter().cloned());
        Ok(ValidationOutput {
            prediction: self.forward(batch.source.clone())?,
            losses: terms(&[(G_GAN, 1.5), (D_REAL, 0.5)]),
        })
    }

    fn optimize_step(
        &mut self,
        network: Network,
        batch: &StainBatch<B>,
    ) -> anyhow::Result<LossTerms> {
        if let Some(bad) = &self.fail_on {
            if batch.ids.contains(bad) {
                anyhow::bail!("malformed batch containing {bad}");
            }
        }
        self.steps.push(Step {
            network,
            ids: batch.ids.clone(),
        });
        Ok(match network {
            Network::Discriminator => terms(&[(D_REAL, 0.5), (D_FAKE, 0.25)]),
            Network::Generator => terms(&[(G_GAN, 1.0), (G_GAN_FEAT, 2.0)]),
        })
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        fs::write(path, b"weights")?;
        self.saved.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn load(&mut self, path: &Path) -> anyhow::Result<()> {
        fs::read(path)?;
        self.loaded.push(path.to_path_buf());
        Ok(())
    }

    fn set_stochastic_inference(&mut self, enabled: bool) {
        self.stochastic = enabled;
    }

    fn stochastic_inference(&self) -> bool {
        self.stochastic
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rates.push(lr);
    }
}

/// `n` examples of `size` x `size` gradients with ids `ex0`, `ex1`, ...
pub fn examples(n: usize, size: usize) -> Vec<Example<B>> {
    let device = Default::default();
    (0..n)
        .map(|i| {
            let values: Vec<f32> = (0..size * size)
                .map(|p| ((p + i * 7) % (size * size)) as f32 / (size * size) as f32)
                .collect();
            let source =
                Tensor::<B, 1>::from_floats(values.as_slice(), &device).reshape([size, size, 1]);
            let target = source.clone() * 0.5 + 0.25;
            Example::new(format!("ex{i}"), source, target).unwrap()
        })
        .collect()
}

#[derive(Default)]
pub struct RecordingSink {
    pub scalars: Vec<(String, f32, usize)>,
    pub flushed: bool,
}

impl ScalarSink for RecordingSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> anyhow::Result<()> {
        self.scalars.push((tag.to_string(), value, step));
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.flushed = true;
        Ok(())
    }
}

/// A sink whose backend is gone.
pub struct BrokenSink;

impl ScalarSink for BrokenSink {
    fn add_scalar(&mut self, _tag: &str, _value: f32, _step: usize) -> anyhow::Result<()> {
        anyhow::bail!("dashboard unreachable")
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        anyhow::bail!("dashboard unreachable")
    }
}

/// Write a 16-bit grayscale TIFF.
pub fn write_gray16(path: &Path, width: u32, height: u32, values: Vec<u16>) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(width, height, values)
        .unwrap()
        .save(path)
        .unwrap();
}
