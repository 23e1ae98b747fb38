//! Durable, append-only log of non-fatal errors
//!
//! Each record is one numbered JSON file under `<dir>/errors/`, with the next
//! number tracked in `errors/next.txt`. Records carry a report location code
//! so the renderer can show each error beside the section it affects.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

pub const ERRORS_DIR: &str = "errors";
const COUNTER_FILE: &str = "next.txt";

/// Where in the report an error belongs. Major number = pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorLocation {
    #[serde(rename = "1.0")]
    Blast,
    #[serde(rename = "1.1")]
    Bold,
    #[serde(rename = "1.10")]
    BoldIdEngine,
    #[serde(rename = "1.11")]
    BoldTaxa,
    #[serde(rename = "4.01")]
    SourceDiversityAccession,
    #[serde(rename = "5")]
    DbCoverage,
    #[serde(rename = "5.01")]
    NoGbifRecord,
    #[serde(rename = "5.02")]
    Taxonkit,
    #[serde(rename = "5.1")]
    DbCoverageTarget,
    #[serde(rename = "5.2")]
    DbCoverageRelated,
    #[serde(rename = "5.3")]
    DbCoverageCountry,
}

impl ErrorLocation {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorLocation::Blast => "1.0",
            ErrorLocation::Bold => "1.1",
            ErrorLocation::BoldIdEngine => "1.10",
            ErrorLocation::BoldTaxa => "1.11",
            ErrorLocation::SourceDiversityAccession => "4.01",
            ErrorLocation::DbCoverage => "5",
            ErrorLocation::NoGbifRecord => "5.01",
            ErrorLocation::Taxonkit => "5.02",
            ErrorLocation::DbCoverageTarget => "5.1",
            ErrorLocation::DbCoverageRelated => "5.2",
            ErrorLocation::DbCoverageCountry => "5.3",
        }
    }

    /// Pipeline phase (the integer part of the code)
    pub fn phase(&self) -> u32 {
        match self {
            ErrorLocation::Blast
            | ErrorLocation::Bold
            | ErrorLocation::BoldIdEngine
            | ErrorLocation::BoldTaxa => 1,
            ErrorLocation::SourceDiversityAccession => 4,
            _ => 5,
        }
    }
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One recorded error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub location: ErrorLocation,
    pub message: String,
    pub exception: Option<String>,
    pub context: Option<Map<String, Value>>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl ErrorRecord {
    pub fn new(location: ErrorLocation, message: impl Into<String>) -> Self {
        Self {
            location,
            message: message.into(),
            exception: None,
            context: None,
            recorded_at: None,
        }
    }

    pub fn with_exception(mut self, exception: impl std::fmt::Display) -> Self {
        self.exception = Some(exception.to_string());
        self
    }

    /// Attach a context field, e.g. `("target", "Homo sapiens")`.
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.as_ref()?.get(key)?.as_str()
    }
}

/// Writer/reader for one directory's error records.
///
/// Cloning shares the write lock, so concurrent tasks in one process never
/// race on the counter; `create_new` guards against other processes.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl ErrorLog {
    /// Error log rooted at `<parent>/errors`
    pub fn for_dir(parent: &Path) -> Self {
        Self {
            dir: parent.join(ERRORS_DIR),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append a record and return its sequence number.
    pub fn write(&self, mut record: ErrorRecord) -> Result<u64> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Internal("error log lock poisoned".to_string()))?;
        std::fs::create_dir_all(&self.dir)?;

        let counter_path = self.dir.join(COUNTER_FILE);
        let mut index = match std::fs::read_to_string(&counter_path) {
            Ok(text) => text.trim().parse::<u64>().unwrap_or(1),
            Err(_) => 1,
        };
        record.recorded_at.get_or_insert_with(Utc::now);
        let body = serde_json::to_vec_pretty(&record)?;

        loop {
            let path = self.dir.join(format!("{}.json", index));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&body)?;
                    break;
                }
                // Another process claimed this number first
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => index += 1,
                Err(e) => return Err(e.into()),
            }
        }
        std::fs::write(&counter_path, (index + 1).to_string())?;
        Ok(index)
    }

    /// Record an error, logging (not propagating) any failure to persist it.
    pub fn record(&self, record: ErrorRecord) {
        let location = record.location;
        if let Err(e) = self.write(record) {
            warn!(location = %location, error = %e, "Failed to persist error record");
        }
    }

    /// Read every record in sequence order.
    pub fn read_all(&self) -> Result<Vec<ErrorRecord>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut numbered = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let index = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(index) = index {
                numbered.push((index, path));
            }
        }
        numbered.sort_by_key(|(index, _)| *index);

        numbered
            .into_iter()
            .map(|(_, path)| {
                let text = std::fs::read_to_string(&path)?;
                Ok(serde_json::from_str(&text)?)
            })
            .collect()
    }
}

/// Selection helpers over loaded records
pub trait ErrorRecordsExt {
    fn at(&self, location: ErrorLocation) -> Vec<&ErrorRecord>;
    fn in_phase(&self, phase: u32) -> Vec<&ErrorRecord>;
    fn with_context(&self, key: &str, value: &str) -> Vec<&ErrorRecord>;
}

impl ErrorRecordsExt for [ErrorRecord] {
    fn at(&self, location: ErrorLocation) -> Vec<&ErrorRecord> {
        self.iter().filter(|r| r.location == location).collect()
    }

    fn in_phase(&self, phase: u32) -> Vec<&ErrorRecord> {
        self.iter().filter(|r| r.location.phase() == phase).collect()
    }

    fn with_context(&self, key: &str, value: &str) -> Vec<&ErrorRecord> {
        self.iter()
            .filter(|r| r.context_str(key) == Some(value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_are_numbered_sequentially() {
        let tmp = TempDir::new().unwrap();
        let log = ErrorLog::for_dir(tmp.path());

        let first = log
            .write(ErrorRecord::new(ErrorLocation::NoGbifRecord, "no record for Foo bar"))
            .unwrap();
        let second = log
            .write(
                ErrorRecord::new(ErrorLocation::DbCoverage, "target failed")
                    .with_exception("HTTP 502: bad gateway")
                    .with_context("target", "Foo bar"),
            )
            .unwrap();

        assert_eq!((first, second), (1, 2));
        let next = std::fs::read_to_string(tmp.path().join("errors/next.txt")).unwrap();
        assert_eq!(next, "3");

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].context_str("target"), Some("Foo bar"));
        assert_eq!(records[1].exception.as_deref(), Some("HTTP 502: bad gateway"));
    }

    #[test]
    fn test_location_codes_serialize_as_strings() {
        let record = ErrorRecord::new(ErrorLocation::BoldIdEngine, "x");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["location"], "1.10");
        assert_ne!(ErrorLocation::BoldIdEngine, ErrorLocation::Bold);
    }

    #[test]
    fn test_skips_numbers_claimed_elsewhere() {
        let tmp = TempDir::new().unwrap();
        let log = ErrorLog::for_dir(tmp.path());
        std::fs::create_dir_all(log.dir()).unwrap();
        std::fs::write(log.dir().join("1.json"), "{}").unwrap();

        let index = log
            .write(ErrorRecord::new(ErrorLocation::Taxonkit, "missing taxid"))
            .unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn test_filter_by_phase_and_context() {
        let records = vec![
            ErrorRecord::new(ErrorLocation::DbCoverageTarget, "a").with_context("target", "X"),
            ErrorRecord::new(ErrorLocation::SourceDiversityAccession, "b"),
            ErrorRecord::new(ErrorLocation::NoGbifRecord, "c").with_context("target", "Y"),
        ];
        assert_eq!(records.in_phase(5).len(), 2);
        assert_eq!(records.at(ErrorLocation::SourceDiversityAccession).len(), 1);
        assert_eq!(records.with_context("target", "Y")[0].message, "c");
    }

    #[test]
    fn test_missing_dir_reads_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(ErrorLog::for_dir(tmp.path()).read_all().unwrap().is_empty());
    }
}
