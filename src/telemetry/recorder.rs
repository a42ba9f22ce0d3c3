//! # Transition Recorder
//!
//! Appends every published widget state to JSONL files.
//!
//! Each line is one record:
//!
//! ```text
//! {"timestamp":"2024-05-01T12:00:00.123Z","widget":"vps","state":{"state":"enabled","payload":{"height":1.5,"unit":"metric"}}}
//! ```
//!
//! A new file is started after `max_records_per_file` records. Only the
//! newest `max_files_to_keep` transition files in the directory are kept.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;

/// File name prefix of transition files.
const FILE_PREFIX: &str = "transitions_";

/// File name extension of transition files.
const FILE_EXTENSION: &str = ".jsonl";

#[derive(Serialize)]
struct TransitionRecord<'a, S> {
    timestamp: String,
    widget: &'a str,
    state: &'a S,
}

/// Rotating JSONL writer for state transitions.
///
/// # Examples
///
/// ```no_run
/// use telemetry_deriver::telemetry::TransitionRecorder;
/// use telemetry_deriver::deriver::DerivedState;
///
/// let mut recorder = TransitionRecorder::new("./logs", 10_000, 10)?;
/// recorder.record("vps", &DerivedState::<f32>::Disabled)?;
/// # Ok::<(), telemetry_deriver::error::DeriverError>(())
/// ```
#[derive(Debug)]
pub struct TransitionRecorder {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    file_seq: u32,
}

impl TransitionRecorder {
    /// Creates a recorder writing into `dir`, creating the directory if needed.
    ///
    /// Zero limits are treated as one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn new(
        dir: impl Into<PathBuf>,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Recording state transitions to {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            current_path: None,
            records_in_file: 0,
            file_seq: 0,
        })
    }

    /// Appends one transition record.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    pub fn record<S: Serialize>(&mut self, widget: &str, state: &S) -> Result<()> {
        let record = TransitionRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            widget,
            state,
        };

        let writer = self.writer()?;
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        self.records_in_file += 1;
        Ok(())
    }

    /// Returns the file currently written to, if any.
    pub fn current_file(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        let writer = match self.writer.take() {
            Some(writer) if self.records_in_file < self.max_records_per_file => writer,
            previous => {
                if let Some(mut previous) = previous {
                    previous.flush()?;
                }
                self.open_next_file()?
            }
        };
        Ok(self.writer.insert(writer))
    }

    fn open_next_file(&mut self) -> Result<BufWriter<File>> {
        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.file_seq,
            FILE_EXTENSION
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        debug!("Opened transition file {}", path.display());
        self.file_seq = self.file_seq.wrapping_add(1);
        self.records_in_file = 0;
        self.current_path = Some(path);
        self.prune()?;

        Ok(BufWriter::new(file))
    }

    /// Deletes the oldest transition files beyond the retention limit.
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| {
                        name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXTENSION)
                    })
            })
            .collect();

        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old transition file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}
