//! Error types for command resolution and process lifecycle

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::CommandKind;

/// Errors surfaced by [`ProcessRunner`](crate::host::ProcessRunner)
///
/// Termination failures never appear here: `terminate` is best effort and
/// swallows them.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// No command table rule matches the source file's extension
    #[error("No {kind} command configured for '.{extension}' files")]
    Unresolved { kind: CommandKind, extension: String },

    /// The OS refused to create the process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// `communicate` ran past its deadline; the process is still running
    #[error("Process did not finish within {0:?}")]
    Timeout(Duration),

    /// A previous run is still alive and overlapping runs are disabled
    #[error("A process is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// I/O was requested before any process was started
    #[error("No process has been started")]
    NotStarted,

    /// The error stream is being drained by the background pump
    #[error("The error stream is owned by the background pump")]
    StreamOwnedByPump,

    /// The error callback cannot change while its pump is live
    #[error("Cannot change the error callback while the error pump is running")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A blocking task was cancelled or panicked
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Errors loading a command table
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read command table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid TOML command table: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON command table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported command table format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },
}

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;
