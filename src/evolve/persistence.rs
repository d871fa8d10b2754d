//! # Evolution Log
//!
//! ## Responsibility
//! Append one [`LogRecord`] per finished cycle and list the most recent ones.
//!
//! ## Guarantees
//! - [`MemoryLog`] is bounded; the oldest record is evicted first
//! - [`JsonlLog`] appends one JSON object per line and fsyncs each append
//! - `list_recent` returns newest first
//!
//! ## NOT Responsible For
//! - Deciding which cycles get logged (see `engine`)

use std::{
    collections::VecDeque,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::lifecycle::{CycleReport, CycleStatus};

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors from an evolution log.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log file could not be read or written.
    #[error("log I/O error on {path}: {source}")]
    Io {
        /// Log file path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("log encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

// ─── Record ───────────────────────────────────────────────────────────────────

/// One finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Improvement worked on.
    pub improvement_id: String,
    /// When the cycle finished.
    pub timestamp: DateTime<Utc>,
    /// Whether it completed and published.
    pub success: bool,
    /// Overall score.
    pub score: f64,
    /// Commit id, when published.
    pub commit_id: Option<String>,
    /// Terminal status.
    pub status: CycleStatus,
    /// Improvement description.
    pub description: String,
    /// Error message for failed cycles.
    pub error: Option<String>,
}

impl LogRecord {
    /// Summarize a report.
    pub fn from_report(report: &CycleReport) -> Self {
        Self {
            improvement_id: report.improvement.id.clone(),
            timestamp: report.finished_at,
            success: report.status == CycleStatus::Completed,
            score: report.overall_success_score,
            commit_id: report.commit_id.clone(),
            status: report.status,
            description: report.improvement.description.clone(),
            error: report.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Append-only record of finished cycles.
pub trait PersistenceLog: Send + Sync {
    /// Append a record.
    fn append(&self, record: &LogRecord) -> Result<(), LogError>;

    /// Up to `limit` records, newest first.
    fn list_recent(&self, limit: usize) -> Result<Vec<LogRecord>, LogError>;
}

// ─── In-memory ────────────────────────────────────────────────────────────────

/// Bounded in-memory log.
#[derive(Debug)]
pub struct MemoryLog {
    records: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
}

impl MemoryLog {
    /// Create a log that keeps at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Return `true` if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceLog for MemoryLog {
    fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<LogRecord>, LogError> {
        Ok(self.records.lock().iter().rev().take(limit).cloned().collect())
    }
}

// ─── JSON lines ───────────────────────────────────────────────────────────────

/// Durable log: one JSON object per line.
#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLog {
    /// Open (or create on first append) the log at `path`.
    ///
    /// # Errors
    /// Returns [`LogError::Io`] if the parent directory cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceLog for JsonlLog {
    fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| io_err(&self.path, e))?;
        file.sync_data().map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<LogRecord>, LogError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.path, e)),
        };
        let lines: Vec<&str> = text.lines().collect();
        let mut out = Vec::new();
        for (idx, line) in lines.iter().enumerate().rev() {
            if out.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(r) => out.push(r),
                Err(e) => warn!(path = %self.path.display(), line = idx + 1, err = %e, "skipping malformed log line"),
            }
        }
        Ok(out)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> LogError {
    LogError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
