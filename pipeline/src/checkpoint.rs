use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use train::model::TranslationModel;

use crate::config::ExperimentConfig;
use crate::error::{PipelineError, Result};

const INDEX_FILE: &str = "iter.txt";
const LOCK_FILE: &str = ".lock";

/// Tag of the snapshot overwritten during training.
pub const LATEST: &str = "latest";

/// Where a run starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Continue at `epoch`, skipping the first `iteration` batches of it.
    Resumed { epoch: usize, iteration: usize },
    /// Start at epoch 1. `reason` says why a requested resume was not possible.
    Fresh { reason: Option<String> },
}

impl ResumeOutcome {
    /// 1-based epoch and the number of batches of it already done.
    pub fn start(&self) -> (usize, usize) {
        match self {
            Self::Resumed { epoch, iteration } => (*epoch, *iteration),
            Self::Fresh { .. } => (1, 0),
        }
    }
}

/// Path of the snapshot with `tag` inside an experiment folder.
pub fn snapshot_path(dir: &Path, tag: &str) -> PathBuf {
    dir.join(format!("{tag}_net"))
}

/// Parse the `epoch,iteration` index.
pub fn parse_index(content: &str) -> Option<(usize, usize)> {
    let (epoch, iteration) = content.trim().split_once(',')?;
    let epoch = epoch.trim().parse().ok()?;
    let iteration = iteration.trim().parse().ok()?;
    (epoch >= 1).then_some((epoch, iteration))
}

/// The checkpoint namespace of one experiment, held by exactly one writer.
///
/// Opening creates `<dir>/.lock` exclusively. The lock is released when the store is dropped.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    lock: PathBuf,
}

impl CheckpointStore {
    pub fn open(experiment: &ExperimentConfig) -> Result<Self> {
        experiment.validate()?;
        Self::open_dir(experiment.experiment_dir())
    }

    pub fn open_dir(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let lock = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PipelineError::CheckpointLocked(dir));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Self { dir, lock })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, tag: &str) -> PathBuf {
        snapshot_path(&self.dir, tag)
    }

    pub fn read_index(&self) -> std::result::Result<(usize, usize), String> {
        let path = self.dir.join(INDEX_FILE);
        let content = fs::read_to_string(&path).map_err(|e| format!("cannot read {path:?}: {e}"))?;
        parse_index(&content).ok_or_else(|| format!("corrupt index {path:?}: {:?}", content.trim()))
    }

    pub fn write_index(&self, epoch: usize, iteration: usize) -> Result<()> {
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, format!("{epoch},{iteration}\n"))?;
        fs::rename(&tmp, self.dir.join(INDEX_FILE))?;
        Ok(())
    }

    /// Decide where training starts and load the snapshot when resuming.
    ///
    /// A missing or corrupt index or snapshot is not an error: the run starts fresh and the
    /// reason is returned for the caller to report.
    pub fn resume<B: Backend, M: TranslationModel<B>>(
        &self,
        model: &mut M,
        experiment: &ExperimentConfig,
    ) -> ResumeOutcome {
        if !experiment.continue_train {
            return ResumeOutcome::Fresh { reason: None };
        }

        let (epoch, iteration) = match self.read_index() {
            Ok(position) => position,
            Err(reason) => return ResumeOutcome::Fresh { reason: Some(reason) },
        };
        let snapshot = self.snapshot_path(&experiment.which_epoch);
        if let Err(e) = model.load(&snapshot) {
            return ResumeOutcome::Fresh {
                reason: Some(format!("cannot load snapshot {snapshot:?}: {e:#}")),
            };
        }
        ResumeOutcome::Resumed { epoch, iteration }
    }

    /// Overwrite the `latest` snapshot, recording `iteration` batches of `epoch` as done.
    pub fn save_latest<B: Backend, M: TranslationModel<B>>(
        &self,
        model: &M,
        epoch: usize,
        iteration: usize,
    ) -> Result<()> {
        log::info!("Saving the latest model (epoch {epoch}, iteration {iteration})");
        model
            .save(&self.snapshot_path(LATEST))
            .map_err(PipelineError::Model)?;
        self.write_index(epoch, iteration)
    }

    /// Save `latest` and a snapshot tagged with the epoch number after `epoch` finished.
    pub fn save_epoch<B: Backend, M: TranslationModel<B>>(
        &self,
        model: &M,
        epoch: usize,
    ) -> Result<()> {
        log::info!("Saving the model at the end of epoch {epoch}");
        model
            .save(&self.snapshot_path(LATEST))
            .map_err(PipelineError::Model)?;
        model
            .save(&self.snapshot_path(&epoch.to_string()))
            .map_err(PipelineError::Model)?;
        self.write_index(epoch + 1, 0)
    }
}

impl Drop for CheckpointStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock) {
            log::warn!("Failed to release checkpoint lock {:?}: {e}", self.lock);
        }
    }
}

/// Load the `tag` snapshot of an experiment into `model`, without taking the writer lock.
pub fn load_snapshot<B: Backend, M: TranslationModel<B>>(
    model: &mut M,
    experiment: &ExperimentConfig,
    tag: &str,
) -> Result<()> {
    let path = snapshot_path(&experiment.experiment_dir(), tag);
    log::info!("Loading model snapshot {path:?}");
    model.load(&path).map_err(PipelineError::Model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index() {
        assert_eq!(parse_index("3,120\n"), Some((3, 120)));
        assert_eq!(parse_index(" 1 , 0 "), Some((1, 0)));
        assert_eq!(parse_index("0,5"), None);
        assert_eq!(parse_index("garbage"), None);
        assert_eq!(parse_index("2;4"), None);
    }

    #[test]
    fn one_writer_per_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("exp");
        let store = CheckpointStore::open_dir(dir.clone()).unwrap();
        assert!(matches!(
            CheckpointStore::open_dir(dir.clone()),
            Err(PipelineError::CheckpointLocked(_))
        ));
        drop(store);
        CheckpointStore::open_dir(dir).unwrap();
    }

    #[test]
    fn index_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open_dir(tmp.path().join("exp")).unwrap();
        assert!(store.read_index().is_err());
        store.write_index(4, 17).unwrap();
        assert_eq!(store.read_index(), Ok((4, 17)));
        assert_eq!(
            fs::read_to_string(store.dir().join("iter.txt")).unwrap(),
            "4,17\n"
        );
    }
}
