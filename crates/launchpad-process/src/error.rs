//! Error types for process management

use std::io;
use thiserror::Error;

/// Process management errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Failed to spawn process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] io::Error),

    /// Executable could not be located on the search path or in any fallback directory
    #[error("{name} not found")]
    ExecutableNotFound { name: String },

    /// Failed to deliver a signal to a process or process group
    #[error("Failed to kill process {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    /// The process inspection tool could not be run or reported a failure
    #[error("Process search failed: {0}")]
    SearchFailed(String),

    /// A pid that must never be signalled (0, or out of range for the platform)
    #[error("Invalid process id: {0}")]
    InvalidPid(String),
}

/// Result type for process operations
pub type Result<T> = std::result::Result<T, ProcessError>;
