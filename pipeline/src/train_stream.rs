use std::time::{Duration, Instant};

use burn::prelude::Backend;
use dataset::{BatchSource, Split};
use tracing::trace_span;
use train::config::{ModelConfig, TrainConfig};
use train::eval::{PixelScore, score_batch};
use train::model::{Network, TranslationModel};
use train::msg::{EpochSummary, LossAccumulator, LossTerms};
use train::stats::Summary;

use crate::checkpoint::{CheckpointStore, ResumeOutcome};
use crate::config::ExperimentConfig;
use crate::error::{PipelineError, Result};
use crate::sink::{ScalarSink, flush_sink, log_scalar};

/// Position of the orchestrator in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainState {
    Init,
    /// Train `epoch`, starting at batch `skip`.
    EpochTrain { epoch: usize, skip: usize },
    EpochValidate { epoch: usize },
    Checkpoint { epoch: usize },
    Done,
}

/// Validation results of one epoch.
#[derive(Clone, Debug)]
pub struct ValidationReport {
    pub losses: EpochSummary,
    pub scores: Vec<PixelScore>,
    pub pearson: Summary,
    pub ssim: Summary,
    pub psnr: Summary,
}

impl ValidationReport {
    fn new(losses: EpochSummary, scores: Vec<PixelScore>) -> Self {
        Self {
            pearson: Summary::of(scores.iter().map(|s| s.pearson)),
            ssim: Summary::of(scores.iter().map(|s| s.ssim)),
            psnr: Summary::of(scores.iter().map(|s| s.psnr)),
            losses,
            scores,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: EpochSummary,
    pub validation: ValidationReport,
}

#[derive(Clone, Debug)]
pub struct TrainReport {
    pub resume: ResumeOutcome,
    pub epochs: Vec<EpochReport>,
    pub train_duration: Duration,
}

/// Drives the alternating adversarial updates over the training stream, validates after every
/// epoch and keeps the checkpoint namespace current.
///
/// The model is borrowed for the whole run: its parameters are only changed through
/// [`TranslationModel::optimize_step`] during `EpochTrain`.
pub struct TrainingLoop<'a, B: Backend, M: TranslationModel<B>> {
    model: &'a mut M,
    sink: &'a mut dyn ScalarSink,
    store: CheckpointStore,
    experiment: ExperimentConfig,
    model_config: ModelConfig,
    train_config: TrainConfig,
    _backend: std::marker::PhantomData<B>,
}

impl<'a, B: Backend, M: TranslationModel<B>> TrainingLoop<'a, B, M> {
    /// Validate every option and take the checkpoint namespace.
    pub fn new(
        model: &'a mut M,
        sink: &'a mut dyn ScalarSink,
        experiment: ExperimentConfig,
        model_config: ModelConfig,
        train_config: TrainConfig,
    ) -> Result<Self> {
        model_config.validate()?;
        train_config.validate()?;
        let store = CheckpointStore::open(&experiment)?;

        log::info!(
            "Experiment '{}': {} epochs ({} + {} decay), lr {}, checkpoints in {:?}",
            experiment.name,
            train_config.total_epochs(),
            train_config.niter,
            train_config.niter_decay,
            model_config.lr,
            store.dir()
        );

        Ok(Self {
            model,
            sink,
            store,
            experiment,
            model_config,
            train_config,
            _backend: std::marker::PhantomData,
        })
    }

    pub fn run(
        mut self,
        train: &mut dyn BatchSource<B>,
        val: &mut dyn BatchSource<B>,
    ) -> Result<TrainReport> {
        if train.num_batches() == 0 {
            return Err(PipelineError::Config("the training stream is empty".into()));
        }

        let mut resume = None;
        let mut epochs = Vec::new();
        let mut train_summary = None;
        let mut train_duration = Duration::ZERO;
        let mut state = TrainState::Init;

        loop {
            log::debug!("Training state {state:?}");
            state = match state {
                TrainState::Init => {
                    let outcome = self.store.resume::<B, M>(&mut *self.model, &self.experiment);
                    match &outcome {
                        ResumeOutcome::Resumed { epoch, iteration } => {
                            log::info!("Resuming from epoch {epoch} at iteration {iteration}");
                        }
                        ResumeOutcome::Fresh { reason: Some(reason) } => {
                            log::warn!("Could not resume, starting at epoch 1: {reason}");
                        }
                        ResumeOutcome::Fresh { reason: None } => {
                            log::info!("Starting a fresh run");
                        }
                    }
                    let (epoch, skip) = outcome.start();
                    resume = Some(outcome);
                    TrainState::EpochTrain { epoch, skip }
                }
                TrainState::EpochTrain { epoch, skip } => {
                    if epoch > self.train_config.total_epochs() {
                        TrainState::Done
                    } else {
                        let start = Instant::now();
                        train_summary = Some(self.train_epoch(train, epoch, skip)?);
                        train_duration += start.elapsed();
                        TrainState::EpochValidate { epoch }
                    }
                }
                TrainState::EpochValidate { epoch } => {
                    let validation = self.validate_epoch(val, epoch, train.num_batches())?;
                    if let Some(train) = train_summary.take() {
                        epochs.push(EpochReport {
                            epoch,
                            train,
                            validation,
                        });
                    }
                    TrainState::Checkpoint { epoch }
                }
                TrainState::Checkpoint { epoch } => {
                    if epoch % self.train_config.save_epoch_freq == 0 {
                        self.store.save_epoch::<B, M>(&*self.model, epoch)?;
                    }
                    TrainState::EpochTrain {
                        epoch: epoch + 1,
                        skip: 0,
                    }
                }
                TrainState::Done => {
                    let resume = resume.take().unwrap_or(ResumeOutcome::Fresh { reason: None });
                    let next = self.train_config.total_epochs() + 1;
                    self.store.save_latest::<B, M>(&*self.model, next.max(resume.start().0), 0)?;
                    flush_sink(self.sink);
                    log::info!("Training finished in {:.1}s", train_duration.as_secs_f32());
                    return Ok(TrainReport {
                        resume,
                        epochs,
                        train_duration,
                    });
                }
            };
        }
    }

    fn train_epoch(
        &mut self,
        train: &mut dyn BatchSource<B>,
        epoch: usize,
        skip: usize,
    ) -> Result<EpochSummary> {
        let lr = self
            .train_config
            .learning_rate_at(self.model_config.lr, epoch);
        self.model.set_learning_rate(lr);
        train.start_epoch(epoch);

        let num_batches = train.num_batches();
        if skip >= num_batches && skip > 0 {
            log::warn!("Resume position {skip} is past the {num_batches} batches of epoch {epoch}");
        }
        log::info!(
            "Epoch {epoch} of {}: training on {num_batches} batches, lr {lr:.2e}",
            self.train_config.total_epochs()
        );

        let mut losses = LossAccumulator::new(Split::Train);
        for iteration in skip..num_batches {
            let _span = trace_span!("Train step", epoch, iteration).entered();

            let batch = train.load_batch(iteration)?;
            // The discriminator sees the current generator before the generator moves.
            let mut terms = self
                .model
                .optimize_step(Network::Discriminator, &batch)
                .map_err(PipelineError::Model)?;
            let generator_terms = self
                .model
                .optimize_step(Network::Generator, &batch)
                .map_err(PipelineError::Model)?;
            terms.extend(generator_terms);
            losses.add(&terms);

            let done = iteration + 1;
            let step = (epoch - 1) * num_batches + done;
            if done % self.train_config.print_freq == 0 {
                log::info!("Epoch {epoch}, iteration {done}: {}", format_terms(&terms));
                for (name, value) in &terms {
                    log_scalar(self.sink, &format!("train/{name}"), *value, step);
                }
            }
            if done % self.train_config.save_latest_freq == 0 && done < num_batches {
                self.store.save_latest::<B, M>(&*self.model, epoch, done)?;
            }
        }

        let summary = losses.reduce();
        log::info!("Epoch {epoch} mean train losses: {}", format_terms(&summary.means));
        Ok(summary)
    }

    fn validate_epoch(
        &mut self,
        val: &mut dyn BatchSource<B>,
        epoch: usize,
        train_batches: usize,
    ) -> Result<ValidationReport> {
        val.start_epoch(epoch);
        let mut losses = LossAccumulator::new(Split::Val);
        let mut scores = Vec::new();

        for index in 0..val.num_batches() {
            let _span = trace_span!("Validation step", epoch, index).entered();
            let batch = val.load_batch(index)?;
            let output = self
                .model
                .validation_step(&batch)
                .map_err(PipelineError::Model)?;
            losses.add(&output.losses);
            scores.extend(score_batch(
                &batch.ids,
                &batch.target,
                &output.prediction,
                self.train_config.data_range,
            )?);
        }

        let report = ValidationReport::new(losses.reduce(), scores);
        let step = epoch * train_batches;
        for (name, value) in &report.losses.means {
            log_scalar(self.sink, &format!("val/{name}"), *value, step);
        }
        log_scalar(self.sink, "val/psnr", report.psnr.mean, step);
        log_scalar(self.sink, "val/ssim", report.ssim.mean, step);
        log_scalar(self.sink, "val/pearson", report.pearson.mean, step);

        log::info!(
            "Epoch {epoch} validation on {} examples: psnr {:.2}, ssim {:.4}, pearson {:.4} ({})",
            report.scores.len(),
            report.psnr.mean,
            report.ssim.mean,
            report.pearson.mean,
            format_terms(&report.losses.means)
        );
        Ok(report)
    }
}

fn format_terms(terms: &LossTerms) -> String {
    terms
        .iter()
        .map(|(name, value)| format!("{name} {value:.4}"))
        .collect::<Vec<_>>()
        .join(", ")
}
