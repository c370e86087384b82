use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const EVENTS_FILE: &str = "events.jsonl";

/// Receives `(tag, value, step)` scalars for visualization.
///
/// Failures are reported to the caller, who logs them and carries on. Losing a scalar never
/// stops a run.
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()>;
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl ScalarSink for NullSink {
    fn add_scalar(&mut self, _tag: &str, _value: f32, _step: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct ScalarEvent<'a> {
    tag: &'a str,
    // Non-finite metrics serialize as null.
    value: Option<f32>,
    step: usize,
}

/// Appends one JSON object per scalar to `<dir>/events.jsonl`.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(EVENTS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarSink for JsonlSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: usize) -> anyhow::Result<()> {
        let event = ScalarEvent {
            tag,
            value: value.is_finite().then_some(value),
            step,
        };
        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Send a scalar, logging instead of failing when the sink refuses it.
pub(crate) fn log_scalar(sink: &mut dyn ScalarSink, tag: &str, value: f32, step: usize) {
    if let Err(e) = sink.add_scalar(tag, value, step) {
        log::warn!("Failed to log scalar {tag} at step {step}: {e:#}");
    }
}

pub(crate) fn flush_sink(sink: &mut dyn ScalarSink) {
    if let Err(e) = sink.flush() {
        log::warn!("Failed to flush the scalar sink: {e:#}");
    }
}
