//! JSONL-backed record store.
//!
//! A data directory holds one JSON Lines file per record kind:
//! `events.jsonl` (pump events), `reservoir.jsonl` (reservoir readings) and
//! `glucose.jsonl` (glucose samples). Appends take an exclusive file lock and
//! reads a shared one, so several processes can work on the same directory.

use crate::source::{DoseHistory, DoseSource, GlucoseSource};
use crate::time::TimelineValue;
use crate::{DoseEntry, GlucoseSample, ReservoirValue, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const RESERVOIR_FILE: &str = "reservoir.jsonl";
pub const GLUCOSE_FILE: &str = "glucose.jsonl";

/// Record sink trait for persisting records
pub trait RecordSink<T> {
    fn append(&mut self, record: &T) -> Result<()>;

    fn append_all(&mut self, records: &[T]) -> Result<()> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }
}

/// JSONL record sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn write_locked<T: Serialize>(&self, records: &[T]) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        FileExt::lock_exclusive(&file)?;

        let mut writer = BufWriter::new(&file);
        for record in records {
            let line = serde_json::to_string(record)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);

        FileExt::unlock(&file)?;
        tracing::debug!("Appended {} records to {:?}", records.len(), self.path);
        Ok(())
    }
}

impl<T: Serialize> RecordSink<T> for JsonlSink {
    fn append(&mut self, record: &T) -> Result<()> {
        self.write_locked(std::slice::from_ref(record))
    }

    /// Writes the whole batch under one lock
    fn append_all(&mut self, records: &[T]) -> Result<()> {
        self.write_locked(records)
    }
}

/// Read every parseable record from a JSONL file.
///
/// A missing file reads as empty. Malformed lines are skipped with a
/// warning.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    FileExt::lock_shared(&file)?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "Skipping malformed record at {:?} line {}: {}",
                    path,
                    line_num + 1,
                    e
                );
            }
        }
    }

    FileExt::unlock(&file)?;
    tracing::debug!("Read {} records from {:?}", records.len(), path);
    Ok(records)
}

fn read_sorted<T: DeserializeOwned + TimelineValue>(path: &Path) -> Result<Vec<T>> {
    let mut records: Vec<T> = read_records(path)?;
    records.sort_by_key(|record| record.start_date());
    Ok(records)
}

/// Directory of JSONL record files
#[derive(Clone, Debug)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    pub fn reservoir_path(&self) -> PathBuf {
        self.dir.join(RESERVOIR_FILE)
    }

    pub fn glucose_path(&self) -> PathBuf {
        self.dir.join(GLUCOSE_FILE)
    }

    /// All pump events, oldest first
    ///
    /// Entries that fail [`DoseEntry::validate`] are skipped with a warning.
    pub fn events(&self) -> Result<Vec<DoseEntry>> {
        let mut events: Vec<DoseEntry> = read_sorted(&self.events_path())?;
        events.retain(|event| match event.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Skipping invalid event in {:?}: {}", self.events_path(), e);
                false
            }
        });
        Ok(events)
    }

    /// All reservoir readings, oldest first
    pub fn reservoir(&self) -> Result<Vec<ReservoirValue>> {
        read_sorted(&self.reservoir_path())
    }

    /// All glucose samples, oldest first
    pub fn glucose(&self) -> Result<Vec<GlucoseSample>> {
        read_sorted(&self.glucose_path())
    }

    /// Everything on disk as one history
    pub fn dose_history(&self) -> Result<DoseHistory> {
        Ok(DoseHistory {
            events: self.events()?,
            reservoir: self.reservoir()?,
        })
    }

    pub fn event_sink(&self) -> JsonlSink {
        JsonlSink::new(self.events_path())
    }

    pub fn reservoir_sink(&self) -> JsonlSink {
        JsonlSink::new(self.reservoir_path())
    }

    pub fn glucose_sink(&self) -> JsonlSink {
        JsonlSink::new(self.glucose_path())
    }
}

impl DoseSource for JsonlStore {
    fn fetch_dose_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DoseHistory> {
        self.dose_history()?.fetch_dose_history(start, end)
    }
}

impl GlucoseSource for JsonlStore {
    fn fetch_glucose(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GlucoseSample>> {
        self.glucose()?.fetch_glucose(start, end)
    }
}
