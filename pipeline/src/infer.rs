use std::collections::HashSet;
use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use dataset::{BatchSource, LoadConfig, image_at};
use tracing::trace_span;
use train::model::TranslationModel;

use crate::config::InferenceConfig;
use crate::error::{PipelineError, Result};
use crate::export::save_prediction;

/// Runs a trained model once over every example of an evaluation stream.
pub struct InferenceRunner<'a, B: Backend, M: TranslationModel<B>> {
    model: &'a mut M,
    config: InferenceConfig,
    _backend: std::marker::PhantomData<B>,
}

impl<'a, B: Backend, M: TranslationModel<B>> InferenceRunner<'a, B, M> {
    pub fn new(model: &'a mut M, config: InferenceConfig, load: &LoadConfig) -> Result<Self> {
        config.validate(load)?;
        Ok(Self {
            model,
            config,
            _backend: std::marker::PhantomData,
        })
    }

    /// Path the prediction for `id` is written to.
    pub fn output_path(&self, id: &str) -> PathBuf {
        Path::new(&self.config.results_dir).join(format!("{id}.tiff"))
    }

    /// Predict every example in stream order with dropout disabled. Returns the written files.
    pub fn run(&mut self, source: &mut dyn BatchSource<B>) -> Result<Vec<PathBuf>> {
        let previous = self.model.stochastic_inference();
        self.model.set_stochastic_inference(false);
        let result = self.predict_all(source);
        self.model.set_stochastic_inference(previous);
        result
    }

    fn predict_all(&self, source: &mut dyn BatchSource<B>) -> Result<Vec<PathBuf>> {
        source.start_epoch(1);
        let total = source.num_batches();
        let count = self.config.how_many.map_or(total, |n| n.min(total));
        log::info!(
            "Running inference on {count} of {total} examples into {:?}",
            self.config.results_dir
        );

        let mut seen = HashSet::new();
        let mut written = Vec::with_capacity(count);
        for index in 0..count {
            let batch = source.load_batch(index)?;
            if batch.len() != 1 {
                return Err(PipelineError::Shape(format!(
                    "inference expects one example per batch, batch {index} has {}",
                    batch.len()
                )));
            }
            let id = &batch.ids[0];
            if !seen.insert(id.clone()) {
                return Err(PipelineError::Config(format!(
                    "example id {id} appears twice in the stream"
                )));
            }

            let _span = trace_span!("Inference", index).entered();
            let prediction = self
                .model
                .forward(batch.source.clone())
                .map_err(PipelineError::Model)?;
            let path = self.output_path(id);
            save_prediction(image_at(&prediction, 0), &path)?;
            log::debug!("{}/{count}: wrote {path:?}", index + 1);
            written.push(path);
        }
        log::info!("Inference done, {} images written", written.len());
        Ok(written)
    }
}
