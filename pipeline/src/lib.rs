pub mod checkpoint;
pub mod config;
pub mod evaluate;
pub mod export;
pub mod infer;
pub mod sampling;
pub mod segment;
pub mod sink;
pub mod train_stream;

mod error;

pub use crate::error::{PipelineError, Result};
pub use checkpoint::{CheckpointStore, ResumeOutcome};
pub use config::{ExperimentConfig, InferenceConfig, RunContext, SamplingConfig};
pub use infer::InferenceRunner;
pub use sampling::{StochasticSampler, UncertaintyMap};
pub use sink::{JsonlSink, NullSink, ScalarSink};
pub use train_stream::{TrainReport, TrainState, TrainingLoop};
