//! # Id Stores
//!
//! ## Responsibility
//! Hold the two grow-only sets the engine depends on: completed improvement
//! ids and admitted artifact content hashes. Both sit behind the [`IdStore`]
//! trait so the engine and the content guard receive them explicitly instead
//! of reaching for process-wide state.
//!
//! ## Guarantees
//! - `add` is an atomic check-and-insert: it returns `true` exactly once per id
//! - [`FileIdStore`] survives restarts (one id per line, append-only)
//! - Nothing is ever removed except through an explicit [`IdStore::clear`]
//!
//! ## NOT Responsible For
//! - Deciding *when* an id is recorded (that belongs to `engine`)

use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use dashmap::DashSet;
use parking_lot::Mutex;
use thiserror::Error;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors produced by an id store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("store I/O error on {path}: {source}")]
    Io {
        /// Path of the backing file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// A grow-only set of string ids.
pub trait IdStore: Send + Sync {
    /// Return `true` if `id` has been recorded.
    fn contains(&self, id: &str) -> bool;

    /// Record `id`. Returns `Ok(true)` if it was newly added, `Ok(false)` if it
    /// was already present.
    fn add(&self, id: &str) -> Result<bool, StoreError>;

    /// Number of recorded ids.
    fn len(&self) -> usize;

    /// Return `true` if no id has been recorded.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every recorded id. Only tests and operator resets call this.
    fn clear(&self) -> Result<(), StoreError>;
}

// ─── In-memory ────────────────────────────────────────────────────────────────

/// Process-local store. History is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryIdStore {
    ids: DashSet<String>,
}

impl MemoryIdStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `ids`.
    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for id in ids {
            store.ids.insert(id.into());
        }
        store
    }
}

impl IdStore for MemoryIdStore {
    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn add(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.ids.insert(id.to_string()))
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.ids.clear();
        Ok(())
    }
}

// ─── File-backed ──────────────────────────────────────────────────────────────

/// Durable store: ids are appended to a text file, one per line, and reloaded
/// on open.
#[derive(Debug)]
pub struct FileIdStore {
    path: PathBuf,
    ids: Mutex<HashSet<String>>,
}

impl FileIdStore {
    /// Open (or create) the store at `path`, loading every id already present.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if the parent directory cannot be created or
    /// the existing file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
            }
        }

        let ids = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(io_err(&path, e)),
        };

        tracing::debug!(path = %path.display(), loaded = ids.len(), "id store opened");
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdStore for FileIdStore {
    fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    fn add(&self, id: &str) -> Result<bool, StoreError> {
        let mut ids = self.ids.lock();
        if ids.contains(id) {
            return Ok(false);
        }
        // Persist before updating memory so a failed write leaves both unchanged.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        writeln!(file, "{id}").map_err(|e| io_err(&self.path, e))?;
        file.sync_data().map_err(|e| io_err(&self.path, e))?;
        ids.insert(id.to_string());
        Ok(true)
    }

    fn len(&self) -> usize {
        self.ids.lock().len()
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut ids = self.ids.lock();
        fs::write(&self.path, "").map_err(|e| io_err(&self.path, e))?;
        ids.clear();
        Ok(())
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
