//! Storage layout for the file-backed store
//!
//! All state lives under a data directory (default `.ideaflow/`) inside the
//! chosen root.
//!
//! # Directory Structure
//!
//! ```text
//! .ideaflow/
//!   tasks.json                    # Task registry
//!   tasks.lock
//!   tasks/<id>/
//!     open_states.json            # Open partial states, one per scope
//!     states.jsonl                # Archived closed states (append-only)
//!     events.jsonl                # Raw activity events (append-only)
//!     state.lock                  # Held for a state transition
//!     events.lock                 # Held for an event append
//! ```

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::lock;
use crate::task::TaskId;

/// Default name of the data directory
pub const DATA_DIR: &str = ".ideaflow";

/// Storage manager for ideaflow state
#[derive(Debug, Clone)]
pub struct Storage {
    /// Directory the data directory lives in
    root: PathBuf,
    /// Path to the data directory
    data_dir: PathBuf,
}

impl Storage {
    /// Create storage with an explicit data directory name or path
    ///
    /// Relative `data_dir` values resolve against `root`.
    pub fn new(root: PathBuf, data_dir: impl AsRef<Path>) -> Self {
        let data_dir = root.join(data_dir.as_ref());
        Self { root, data_dir }
    }

    /// Create storage using the default `.ideaflow/` directory
    pub fn for_root(root: PathBuf) -> Self {
        Self::new(root, DATA_DIR)
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path to the task registry
    pub fn tasks_file(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    /// Lock guarding registry updates
    pub fn tasks_lock_file(&self) -> PathBuf {
        self.data_dir.join("tasks.lock")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    /// Per-task directory
    pub fn task_dir(&self, task_id: TaskId) -> PathBuf {
        self.tasks_dir().join(task_id.to_string())
    }

    pub fn open_states_file(&self, task_id: TaskId) -> PathBuf {
        self.task_dir(task_id).join("open_states.json")
    }

    pub fn closed_states_log(&self, task_id: TaskId) -> PathBuf {
        self.task_dir(task_id).join("states.jsonl")
    }

    pub fn events_log(&self, task_id: TaskId) -> PathBuf {
        self.task_dir(task_id).join("events.jsonl")
    }

    pub fn state_lock_file(&self, task_id: TaskId) -> PathBuf {
        self.task_dir(task_id).join("state.lock")
    }

    pub fn events_lock_file(&self, task_id: TaskId) -> PathBuf {
        self.task_dir(task_id).join("events.lock")
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the data directory and task directory root
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.tasks_dir())?;
        Ok(())
    }

    /// Create the directory for a single task
    pub fn init_task(&self, task_id: TaskId) -> Result<()> {
        fs::create_dir_all(self.task_dir(task_id))?;
        Ok(())
    }

    /// Check if storage has been initialized
    pub fn is_initialized(&self) -> bool {
        self.tasks_file().exists()
    }

    // =========================================================================
    // File I/O helpers (atomic writes for safety)
    // =========================================================================

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    /// Read JSON data from a file
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }

    /// Append a line to a JSONL file
    ///
    /// Not atomic on its own; callers hold the matching lock file.
    pub fn append_jsonl<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(record)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        writeln!(file, "{}", json)?;
        file.sync_all()?;

        Ok(())
    }

    /// Read all records from a JSONL file
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: T = serde_json::from_str(&line)?;
            records.push(record);
        }

        Ok(records)
    }
}
