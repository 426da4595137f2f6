//! Identifiers, spawn parameters and error types shared by PTY providers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use settings::constants::pty::{INITIAL_COLUMNS, INITIAL_ROWS};

/// Opaque identifier of a spawned PTY process.
///
/// A live tab uses its process id as its own id, so this value doubles as
/// the tab identity for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Terminal dimensions in rows and columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: INITIAL_COLUMNS,
            rows: INITIAL_ROWS,
        }
    }
}

/// Parameters for a spawn request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnRequest {
    pub working_directory: PathBuf,
    pub size: TermSize,
}

impl SpawnRequest {
    /// Spawn request with the initial 80x24 geometry.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            size: TermSize::default(),
        }
    }
}

/// A process could not be created.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("working directory {0:?} does not exist")]
    MissingDirectory(PathBuf),
    #[error("failed to open PTY: {0}")]
    OpenPty(String),
    #[error("failed to spawn '{shell}': {reason}")]
    Command { shell: String, reason: String },
    #[error("failed to attach PTY I/O: {0}")]
    Io(String),
    #[error("spawn task aborted: {0}")]
    Aborted(String),
}

/// A process could not be terminated.
#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("no PTY process with id {0}")]
    NotFound(ProcessId),
    #[error("failed to terminate {id}: {reason}")]
    Failed { id: ProcessId, reason: String },
}
