//! Service lifecycle state machine
//!
//! ```text
//! Stopped ─► Starting ─► Initializing ═► Running ─► Stopping ─► Stopped
//!    ▲                                      │                      │
//!    └──────────────────────────────────────┴──── (any) ─► Error ──┘
//! ```
//!
//! `Initializing` is never surfaced: applying it yields `Running`.

use tracing::warn;

use crate::types::ServiceStatus;

/// Current status and listening URL of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    status: ServiceStatus,
    url: Option<String>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            status: ServiceStatus::Stopped,
            url: None,
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Apply a status reported by the runner and return the visible status.
    ///
    /// The runner is authoritative, so unexpected transitions are applied
    /// anyway and only logged. The URL is cleared on entry to `Stopped` or
    /// `Error`.
    pub fn apply(&mut self, reported: ServiceStatus) -> ServiceStatus {
        if !is_legal(self.status, reported) {
            warn!(from = %self.status, to = %reported, "Unexpected status transition");
        }

        self.status = match reported {
            ServiceStatus::Initializing | ServiceStatus::Running => ServiceStatus::Running,
            other => other,
        };
        if matches!(self.status, ServiceStatus::Stopped | ServiceStatus::Error) {
            self.url = None;
        }
        self.status
    }

    /// Record a discovered listening URL
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `to` may follow `from` as reported by a runner
pub fn is_legal(from: ServiceStatus, to: ServiceStatus) -> bool {
    use ServiceStatus::*;

    matches!(
        (from, to),
        (_, Error)
            | (Stopped | Error, Starting)
            | (Starting, Initializing)
            | (Running, Stopping)
            | (Running | Stopping | Stopped | Error, Stopped)
    )
}
