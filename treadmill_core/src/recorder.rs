//! CSV session recorder and the trial switch that drives it.
//!
//! One file per session under the configured directory, named by local
//! creation time so a plain directory listing sorts oldest to newest.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::WrapErr;
use treadmill_traits::{BoxError, SessionRecorder};

pub const CSV_HEADER: [&str; 3] = ["time_elapsed", "desired_speed", "actual_speed"];
const FILE_STAMP: &str = "%Y_%m_%d-%H_%M_%S_%3f";

#[derive(Debug)]
pub struct CsvRecorder {
    dir: PathBuf,
    writer: Option<csv::Writer<File>>,
    path: Option<PathBuf>,
    rows: u64,
}

impl CsvRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: None,
            path: None,
            rows: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the open (or last) session file.
    pub fn current_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn open(&mut self) -> eyre::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .wrap_err_with(|| format!("create recording dir {}", self.dir.display()))?;
        let stamp = chrono::Local::now().format(FILE_STAMP);
        let path = self.dir.join(format!("{stamp}.csv"));
        let mut writer = csv::Writer::from_path(&path)
            .wrap_err_with(|| format!("create session file {}", path.display()))?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "recording session");
        self.writer = Some(writer);
        self.path = Some(path);
        self.rows = 0;
        Ok(())
    }
}

impl SessionRecorder for CsvRecorder {
    fn create_session(&mut self) -> Result<(), BoxError> {
        if self.writer.is_some() {
            self.close()?;
        }
        self.open().map_err(|e| -> BoxError { e.into() })
    }

    fn record(
        &mut self,
        elapsed_s: f64,
        desired_mps: f64,
        actual_mps: f64,
    ) -> Result<(), BoxError> {
        let Some(w) = self.writer.as_mut() else {
            return Err("no open recording session".into());
        };
        w.write_record([
            format!("{elapsed_s:.3}"),
            format!("{desired_mps:.4}"),
            format!("{actual_mps:.4}"),
        ])?;
        w.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BoxError> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
            tracing::info!(rows = self.rows, "recording closed");
        }
        Ok(())
    }
}

/// Experiment toggle: on opens a recording, off ramps to rest and closes it.
#[derive(Debug, Clone, Default)]
pub struct TrialSwitch(Arc<AtomicBool>);

impl TrialSwitch {
    pub fn new() -> Self {
        Self::default()
    }
    /// Flip and return the new state.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::AcqRel)
    }
    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::Release);
    }
    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
