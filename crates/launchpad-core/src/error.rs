//! Supervisor error types

use launchpad_process::ProcessError;
use thiserror::Error;

/// Supervisor result type
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors reported synchronously to callers of the control surface
///
/// A child that exits with a failure status on its own is not an error value:
/// there is no caller to report it to, so it surfaces as an `Error` status
/// transition plus an Error-level log entry.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Unknown service id
    #[error("Service not found: {id}")]
    NotFound { id: String },

    /// `start` on a service that already owns a child
    #[error("Service already running")]
    AlreadyRunning,

    /// Executable resolution or OS spawn failure
    #[error("{0}")]
    Spawn(String),

    /// A termination signal could not be delivered
    #[error("Failed to stop process: {0}")]
    Kill(String),

    /// Invalid or unreadable supervisor settings
    #[error("Settings error: {0}")]
    Settings(String),

    /// Malformed service configuration document
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for SupervisorError {
    fn from(err: config::ConfigError) -> Self {
        SupervisorError::Settings(err.to_string())
    }
}

impl SupervisorError {
    pub(crate) fn spawn(err: ProcessError) -> Self {
        SupervisorError::Spawn(err.to_string())
    }

    pub(crate) fn kill(err: ProcessError) -> Self {
        SupervisorError::Kill(err.to_string())
    }
}
