//! Core data model shared by runners, the aggregator and observers

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variables, name to value
///
/// When merging, an empty value deletes the inherited key instead of setting it.
pub type ServiceEnv = HashMap<String, String>;

/// Lifecycle status of a supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Starting,
    Initializing,
    Running,
    Stopping,
    Error,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Initializing => write!(f, "initializing"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopping => write!(f, "stopping"),
            ServiceStatus::Error => write!(f, "error"),
        }
    }
}

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "ERR")]
    Error,
    #[serde(rename = "INF")]
    Info,
    #[serde(rename = "WARN")]
    Warning,
    #[serde(rename = "DBG")]
    Debug,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERR"),
            LogLevel::Info => write!(f, "INF"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Debug => write!(f, "DBG"),
        }
    }
}

/// Pipe a record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One classified log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Classified, human oriented text
    pub message: String,
    /// Unmodified original text, possibly several lines joined by `\n`
    pub raw: String,
    /// Origin pipe, kept even when the level was reclassified
    pub stream: OutputStream,
}

impl LogEntry {
    /// Record whose message is the raw text
    pub fn new(level: LogLevel, raw: impl Into<String>, stream: OutputStream) -> Self {
        let raw = raw.into();
        Self {
            timestamp: Utc::now(),
            level,
            message: raw.clone(),
            raw,
            stream,
        }
    }

    /// Record produced by the supervisor itself rather than the child
    pub fn supervisor(level: LogLevel, message: impl Into<String>) -> Self {
        Self::new(level, message, OutputStream::Stdout)
    }

    /// Replace the human oriented text, keeping `raw`
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Configuration of one supervised service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Absolute working directory
    pub path: PathBuf,
    #[serde(default)]
    pub env: ServiceEnv,
    /// Process family, e.g. `npm` or `dotnet`
    #[serde(rename = "type", default)]
    pub service_type: String,
}

impl ServiceConfig {
    /// Create a config with an empty environment
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        service_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            env: ServiceEnv::new(),
            service_type: service_type.into(),
        }
    }

    /// Set the service-level environment
    pub fn with_env(mut self, env: ServiceEnv) -> Self {
        self.env = env;
        self
    }
}
