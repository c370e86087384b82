use std::path::PathBuf;

use burn::prelude::{Backend, Config};
use dataset::LoadConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use train::config::ModelConfig;

use crate::error::PipelineError;

#[derive(Config, Debug)]
pub struct ExperimentConfig {
    /// Name of the experiment, also the checkpoint namespace.
    pub name: String,

    /// Folder holding one checkpoint namespace per experiment.
    #[config(default = "String::from(\"./checkpoints\")")]
    pub checkpoints_dir: String,

    /// Resume from the saved index and snapshot instead of starting fresh.
    #[config(default = false)]
    pub continue_train: bool,

    /// Snapshot tag to load when resuming, "latest" or an epoch number.
    #[config(default = "String::from(\"latest\")")]
    pub which_epoch: String,

    /// Random seed.
    #[config(default = 42)]
    pub seed: u64,
}

impl ExperimentConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(PipelineError::Config(format!(
                "experiment name must be a plain folder name, got {:?}",
                self.name
            )));
        }
        if self.checkpoints_dir.is_empty() {
            return Err(PipelineError::Config("checkpoints_dir must be set".into()));
        }
        check_tag(&self.which_epoch)
    }

    /// `<checkpoints_dir>/<name>`.
    pub fn experiment_dir(&self) -> PathBuf {
        PathBuf::from(&self.checkpoints_dir).join(&self.name)
    }
}

fn check_tag(tag: &str) -> crate::error::Result<()> {
    if tag == "latest" || tag.parse::<usize>().is_ok() {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "which_epoch must be \"latest\" or an epoch number, got {tag:?}"
        )))
    }
}

#[derive(Config, Debug)]
pub struct InferenceConfig {
    /// Where predictions are written, one `<id>.tiff` per example.
    pub results_dir: String,

    /// Max nr. of examples to run. All when unset.
    pub how_many: Option<usize>,

    #[config(default = "String::from(\"latest\")")]
    pub which_epoch: String,
}

impl InferenceConfig {
    /// Check the options against the loader the runner will read from.
    pub fn validate(&self, load: &LoadConfig) -> crate::error::Result<()> {
        if self.results_dir.is_empty() {
            return Err(PipelineError::Config("results_dir must be set".into()));
        }
        if load.batch_size != 1 {
            return Err(PipelineError::Config(format!(
                "inference runs one example at a time, got batch_size {}",
                load.batch_size
            )));
        }
        if !load.serial_batches || !load.no_flip {
            return Err(PipelineError::Config(
                "inference streams must keep stored order and disable flips".into(),
            ));
        }
        if self.how_many == Some(0) {
            return Err(PipelineError::Config("how_many must be positive".into()));
        }
        check_tag(&self.which_epoch)
    }
}

#[derive(Config, Debug)]
pub struct SamplingConfig {
    /// Where uncertainty maps (and optionally raw samples) are written.
    pub samples_dir: String,

    /// Forward passes per example.
    #[config(default = 100)]
    pub runs: usize,

    /// Also write every individual sample.
    #[config(default = false)]
    pub save_samples: bool,
}

impl SamplingConfig {
    pub fn validate(&self, model: &ModelConfig) -> crate::error::Result<()> {
        if self.runs == 0 {
            return Err(PipelineError::Config("runs must be at least 1".into()));
        }
        if self.samples_dir.is_empty() {
            return Err(PipelineError::Config("samples_dir must be set".into()));
        }
        if !model.use_dropout {
            return Err(PipelineError::Config(
                "sampling needs a model trained with use_dropout".into(),
            ));
        }
        Ok(())
    }
}

/// Seed, device and output folder shared by the components of one run.
#[derive(Clone, Debug)]
pub struct RunContext<B: Backend> {
    pub seed: u64,
    pub device: B::Device,
    pub experiment_dir: PathBuf,
}

impl<B: Backend> RunContext<B> {
    /// Validate the experiment and seed the backend.
    pub fn new(experiment: &ExperimentConfig, device: B::Device) -> crate::error::Result<Self> {
        experiment.validate()?;
        log::info!("Using seed {}", experiment.seed);
        B::seed(experiment.seed);
        Ok(Self {
            seed: experiment.seed,
            device,
            experiment_dir: experiment.experiment_dir(),
        })
    }

    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    /// Loader options carrying this run's seed.
    pub fn seeded(&self, load: LoadConfig) -> LoadConfig {
        load.with_seed(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_dir_is_namespaced() {
        let config =
            ExperimentConfig::new("nuclei_run".into()).with_checkpoints_dir("/tmp/ck".into());
        config.validate().unwrap();
        assert_eq!(config.experiment_dir(), PathBuf::from("/tmp/ck/nuclei_run"));
    }

    #[test]
    fn rejects_bad_tags_and_names() {
        assert!(ExperimentConfig::new("a/b".into()).validate().is_err());
        assert!(
            ExperimentConfig::new("a".into())
                .with_which_epoch("best".into())
                .validate()
                .is_err()
        );
        ExperimentConfig::new("a".into())
            .with_which_epoch("20".into())
            .validate()
            .unwrap();
    }

    #[test]
    fn run_context_carries_the_seed() {
        let experiment = ExperimentConfig::new("seeded".into()).with_seed(7);
        let ctx = RunContext::<burn::backend::NdArray<f32>>::new(&experiment, Default::default())
            .unwrap();
        assert_eq!(ctx.seed, 7);
        assert_eq!(ctx.experiment_dir, experiment.experiment_dir());
        assert_eq!(ctx.seeded(LoadConfig::new("/data".into())).seed, 7);

        use rand::Rng;
        let a: u64 = ctx.rng().random();
        let b: u64 = ctx.rng().random();
        assert_eq!(a, b);
    }

    #[test]
    fn inference_needs_single_example_batches() {
        let load = LoadConfig::new("/data".into());
        let config = InferenceConfig::new("/tmp/out".into());
        assert!(config.validate(&load).is_err());
        config.validate(&load.for_evaluation()).unwrap();
    }

    #[test]
    fn sampling_needs_dropout() {
        let config = SamplingConfig::new("/tmp/samples".into());
        assert!(config.validate(&ModelConfig::new()).is_err());
        config
            .validate(&ModelConfig::new().with_use_dropout(true))
            .unwrap();
        assert!(
            config
                .with_runs(0)
                .validate(&ModelConfig::new().with_use_dropout(true))
                .is_err()
        );
    }
}
