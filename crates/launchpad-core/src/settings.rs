//! Supervisor tuning knobs
//!
//! Loaded from an optional TOML file layered under `LAUNCHPAD_*` environment
//! variables, e.g. `LAUNCHPAD_STOP_GRACE_MS=250`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};

/// Runtime settings shared by every service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Rolling log buffer size per service
    pub log_capacity: usize,
    /// Grace between the interrupt and the forced kill on stop
    pub stop_grace_ms: u64,
    /// Wait between terminating a stale process and probing it
    pub reap_wait_ms: u64,
    pub log_channel_capacity: usize,
    pub url_channel_capacity: usize,
    pub status_channel_capacity: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            log_capacity: 100,
            stop_grace_ms: 500,
            reap_wait_ms: 1000,
            log_channel_capacity: 100,
            url_channel_capacity: 10,
            status_channel_capacity: 10,
        }
    }
}

impl SupervisorSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn reap_wait(&self) -> Duration {
        Duration::from_millis(self.reap_wait_ms)
    }

    /// Reject values that would make a channel or buffer unusable
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("log_capacity", self.log_capacity),
            ("log_channel_capacity", self.log_channel_capacity),
            ("url_channel_capacity", self.url_channel_capacity),
            ("status_channel_capacity", self.status_channel_capacity),
        ];
        for (key, value) in sizes {
            if value == 0 {
                return Err(SupervisorError::Settings(format!(
                    "{key} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

/// Loads [`SupervisorSettings`] from file and environment
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    path: PathBuf,
    env_prefix: String,
}

impl SettingsLoader {
    /// Loader for the default settings file
    pub fn new() -> Self {
        Self::with_path(Self::default_path())
    }

    /// Loader for a specific settings file
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env_prefix: "LAUNCHPAD".to_string(),
        }
    }

    /// Override the environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// `<config dir>/launchpad/settings.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("launchpad")
            .join("settings.toml")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load and validate; a missing file yields the defaults
    pub fn load(&self) -> Result<SupervisorSettings> {
        let config = Config::builder()
            .add_source(File::from(self.path.clone()).required(false))
            .add_source(Environment::with_prefix(&self.env_prefix).try_parsing(true))
            .build()?;

        let settings: SupervisorSettings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
