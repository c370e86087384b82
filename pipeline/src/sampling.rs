use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use burn::tensor::Tensor;
use dataset::{BatchSource, image_at, tensor_to_vec};
use serde::Serialize;
use tracing::trace_span;
use train::config::ModelConfig;
use train::model::TranslationModel;

use crate::config::SamplingConfig;
use crate::error::{PipelineError, Result};
use crate::export::{save_prediction, save_uncertainty};

/// Per-pixel variance of an ensemble of predictions for one example.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UncertaintyMap {
    pub id: String,
    /// `[H, W, C]`.
    pub shape: [usize; 3],
    pub runs: usize,
    /// Population variance across the runs, row-major.
    pub variance: Vec<f32>,
    pub mean: f32,
    pub max: f32,
}

impl UncertaintyMap {
    /// Reduce `[H, W, C]` samples of one example to their variance across the sample axis.
    pub fn from_samples<B: Backend>(
        id: impl Into<String>,
        samples: Vec<Tensor<B, 3>>,
    ) -> Result<Self> {
        let id = id.into();
        let Some(first) = samples.first() else {
            return Err(PipelineError::Config(format!("no samples for {id}")));
        };
        let shape = first.dims();
        if let Some(other) = samples.iter().find(|s| s.dims() != shape) {
            return Err(PipelineError::Shape(format!(
                "samples of {id} disagree: {shape:?} vs {:?}",
                other.dims()
            )));
        }

        let runs = samples.len();
        let variance = Tensor::stack::<4>(samples, 0).var_bias(0).squeeze::<3>(0);
        let variance = tensor_to_vec(variance)?;
        let max = variance.iter().copied().fold(0.0f32, f32::max);
        let mean = variance.iter().map(|&v| v as f64).sum::<f64>() / variance.len().max(1) as f64;

        Ok(Self {
            id,
            shape,
            runs,
            variance,
            mean: mean as f32,
            max,
        })
    }
}

#[derive(Debug)]
pub struct SamplingReport {
    pub maps: Vec<UncertaintyMap>,
    /// JSON files of the maps, in stream order.
    pub written: Vec<PathBuf>,
}

/// Monte-Carlo dropout: many forward passes per example with dropout kept active.
pub struct StochasticSampler<'a, B: Backend, M: TranslationModel<B>> {
    model: &'a mut M,
    config: SamplingConfig,
    _backend: std::marker::PhantomData<B>,
}

impl<'a, B: Backend, M: TranslationModel<B>> StochasticSampler<'a, B, M> {
    pub fn new(
        model: &'a mut M,
        config: SamplingConfig,
        model_config: &ModelConfig,
    ) -> Result<Self> {
        config.validate(model_config)?;
        Ok(Self {
            model,
            config,
            _backend: std::marker::PhantomData,
        })
    }

    /// Sample every example of `source`. The model's stochastic inference flag is restored
    /// afterwards, also when sampling fails.
    pub fn run(&mut self, source: &mut dyn BatchSource<B>) -> Result<SamplingReport> {
        let previous = self.model.stochastic_inference();
        self.model.set_stochastic_inference(true);
        let result = self.sample_all(source);
        self.model.set_stochastic_inference(previous);
        result
    }

    fn sample_all(&self, source: &mut dyn BatchSource<B>) -> Result<SamplingReport> {
        let dir = Path::new(&self.config.samples_dir);
        source.start_epoch(1);

        let num_batches = source.num_batches();
        log::info!(
            "Sampling {num_batches} batches with {} runs each into {dir:?}",
            self.config.runs
        );

        let mut maps = Vec::new();
        let mut written = Vec::new();
        for index in 0..num_batches {
            let batch = source.load_batch(index)?;
            let _span = trace_span!("Sample batch", index).entered();

            let runs = (0..self.config.runs)
                .map(|_| self.model.forward(batch.source.clone()))
                .collect::<anyhow::Result<Vec<_>>>()
                .map_err(PipelineError::Model)?;

            for (i, id) in batch.ids.iter().enumerate() {
                let samples: Vec<Tensor<B, 3>> = runs.iter().map(|run| image_at(run, i)).collect();
                if self.config.save_samples {
                    for (k, sample) in samples.iter().enumerate() {
                        let path = dir.join(id).join(format!("sample_{k:03}.tiff"));
                        save_prediction(sample.clone(), &path)?;
                    }
                }
                let map = UncertaintyMap::from_samples(id.clone(), samples)?;
                log::info!(
                    "{id}: mean variance {:.3e}, max {:.3e} over {} runs",
                    map.mean,
                    map.max,
                    map.runs
                );
                written.push(save_uncertainty(&map, dir)?);
                maps.push(map);
            }
        }
        Ok(SamplingReport { maps, written })
    }
}
