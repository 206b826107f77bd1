//! Service event aggregator
//!
//! A [`Service`] owns one [`Runner`] and a background loop that turns the
//! runner's log, URL and status events into externally visible state (status,
//! URL, rolling log buffer) and republishes them as [`ServiceEvent`]s.
//!
//! Status and URL are mutated only by the loop. Readers take the read lock
//! for a snapshot; no lock is held across an await or a publish.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::LogBuffer;
use crate::env::merge_env;
use crate::error::Result;
use crate::events::{EventPublisher, ServiceEvent};
use crate::family::{FamilyStrategy, LaunchMode, ProcessFamily};
use crate::lifecycle::Lifecycle;
use crate::runner::{Runner, RunnerChannels, RunnerContext};
use crate::types::{LogEntry, LogLevel, ServiceConfig, ServiceEnv, ServiceStatus};

const LOOP_SHUTDOWN: Duration = Duration::from_secs(1);

/// Immutable snapshot returned by [`Service::info`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub logs: Vec<LogEntry>,
    /// Service-level variables as configured, deletion markers included
    pub env: ServiceEnv,
    pub inherited_env: ServiceEnv,
    #[serde(rename = "type")]
    pub service_type: String,
}

#[derive(Debug)]
struct ServiceState {
    config: ServiceConfig,
    inherited_env: ServiceEnv,
    lifecycle: Lifecycle,
    logs: LogBuffer,
}

/// One supervised service
pub struct Service {
    id: String,
    family: Arc<dyn FamilyStrategy>,
    state: Arc<RwLock<ServiceState>>,
    runner: Mutex<Runner>,
    publisher: Arc<dyn EventPublisher>,
    consumer: parking_lot::Mutex<Option<Consumer>>,
}

/// Handle on a service's event loop
struct Consumer {
    task: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl Service {
    /// Create a service whose family follows `config.service_type`.
    ///
    /// Must be called from within a Tokio runtime: the event loop is spawned
    /// immediately.
    pub fn new(
        id: impl Into<String>,
        config: ServiceConfig,
        inherited_env: ServiceEnv,
        context: Arc<RunnerContext>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let family = ProcessFamily::from_type(&config.service_type).strategy();
        Self::with_family(id, config, inherited_env, family, context, publisher)
    }

    /// Create a service with an explicit family strategy
    pub fn with_family(
        id: impl Into<String>,
        config: ServiceConfig,
        inherited_env: ServiceEnv,
        family: Arc<dyn FamilyStrategy>,
        context: Arc<RunnerContext>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let id = id.into();
        let merged = merge_env(&inherited_env, &config.env);
        let log_capacity = context.settings.log_capacity;
        let (runner, channels) = Runner::new(family.clone(), config.path.clone(), merged, context);

        let state = Arc::new(RwLock::new(ServiceState {
            config,
            inherited_env,
            lifecycle: Lifecycle::new(),
            logs: LogBuffer::new(log_capacity),
        }));

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handler = EventHandler {
            id: id.clone(),
            state: state.clone(),
            publisher: publisher.clone(),
        };
        let task = tokio::spawn(consume(handler, channels, shutdown_rx));
        debug!(service_id = %id, family = family.name(), "Service created");

        Self {
            id,
            family,
            state,
            runner: Mutex::new(runner),
            publisher,
            consumer: parking_lot::Mutex::new(Some(Consumer { task, shutdown })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn family(&self) -> &Arc<dyn FamilyStrategy> {
        &self.family
    }

    pub fn status(&self) -> ServiceStatus {
        self.state.read().lifecycle.status()
    }

    pub fn url(&self) -> Option<String> {
        self.state.read().lifecycle.url().map(str::to_string)
    }

    pub fn config(&self) -> ServiceConfig {
        self.state.read().config.clone()
    }

    /// Whether the runner owns a live child
    pub async fn is_running(&self) -> bool {
        self.runner.lock().await.is_running()
    }

    pub async fn start(&self) -> Result<()> {
        info!(service_id = %self.id, "Starting service");
        self.runner.lock().await.start(LaunchMode::Standard).await
    }

    /// Start through the family's fast path, skipping its build step
    pub async fn start_without_build(&self) -> Result<()> {
        info!(service_id = %self.id, "Starting service without build");
        self.runner.lock().await.start(LaunchMode::SkipBuild).await
    }

    pub async fn stop(&self) -> Result<()> {
        info!(service_id = %self.id, "Stopping service");
        self.runner.lock().await.stop().await
    }

    /// Replace the configuration; path and environment apply on the next start.
    ///
    /// The family is fixed for the lifetime of a service, so `service_type`
    /// changes are recorded but do not switch families.
    pub async fn update_config(&self, config: ServiceConfig, inherited_env: ServiceEnv) {
        let merged = merge_env(&inherited_env, &config.env);
        let path = config.path.clone();
        {
            let mut state = self.state.write();
            state.config = config;
            state.inherited_env = inherited_env;
        }
        self.runner.lock().await.update_config(path, merged);
        debug!(service_id = %self.id, "Service config updated");
    }

    /// Empty the log buffer and notify observers
    pub fn clear_logs(&self) {
        let (status, url) = {
            let mut state = self.state.write();
            state.logs.clear();
            (
                state.lifecycle.status(),
                state.lifecycle.url().map(str::to_string),
            )
        };
        self.publisher
            .publish(ServiceEvent::status_update(&self.id, status, url));
    }

    /// Snapshot of the externally visible state
    pub fn info(&self) -> ServiceInfo {
        let state = self.state.read();
        ServiceInfo {
            id: self.id.clone(),
            name: state.config.name.clone(),
            path: state.config.path.clone(),
            status: state.lifecycle.status(),
            url: state.lifecycle.url().map(str::to_string),
            logs: state.logs.to_vec(),
            env: state.config.env.clone(),
            inherited_env: state.inherited_env.clone(),
            service_type: state.config.service_type.clone(),
        }
    }

    /// Stop the child if one is running, then end the event loop once it has
    /// published everything the runner emitted
    pub async fn shutdown(&self) -> Result<()> {
        let stopped = {
            let mut runner = self.runner.lock().await;
            if runner.is_running() {
                runner.stop().await
            } else {
                Ok(())
            }
        };

        let consumer = self.consumer.lock().take();
        if let Some(Consumer { task, shutdown }) = consumer {
            let _ = shutdown.send(());
            let abort = task.abort_handle();
            if tokio::time::timeout(LOOP_SHUTDOWN, task).await.is_err() {
                warn!(service_id = %self.id, "Service event loop did not finish, aborting");
                abort.abort();
            }
        }
        debug!(service_id = %self.id, "Service shut down");
        stopped
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("family", &self.family.name())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.get_mut().take() {
            consumer.task.abort();
        }
    }
}

/// Event loop of one service
///
/// Runs until shutdown is requested, draining whatever the runner already
/// emitted, or until every runner sender is gone.
async fn consume(
    handler: EventHandler,
    mut channels: RunnerChannels,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            Some(entry) = channels.logs.recv() => handler.on_log(entry),
            Some(url) = channels.urls.recv() => handler.on_url(url),
            Some(status) = channels.statuses.recv() => handler.on_status(status),
            _ = &mut shutdown => {
                while let Ok(entry) = channels.logs.try_recv() {
                    handler.on_log(entry);
                }
                while let Ok(url) = channels.urls.try_recv() {
                    handler.on_url(url);
                }
                while let Ok(status) = channels.statuses.try_recv() {
                    handler.on_status(status);
                }
                break;
            }
            else => break,
        }
    }
    debug!(service_id = %handler.id, "Service event loop finished");
}

/// Applies runner events to the shared state and republishes them
struct EventHandler {
    id: String,
    state: Arc<RwLock<ServiceState>>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandler {
    /// Buffer the entry; Error entries also refresh observers' status view
    fn on_log(&self, entry: LogEntry) {
        let is_error = entry.level == LogLevel::Error;
        let snapshot = {
            let mut state = self.state.write();
            state.logs.push(entry.clone());
            is_error.then(|| {
                (
                    state.lifecycle.status(),
                    state.lifecycle.url().map(str::to_string),
                )
            })
        };
        self.publisher.publish(ServiceEvent::new_log(&self.id, entry));
        if let Some((status, url)) = snapshot {
            self.publisher
                .publish(ServiceEvent::status_update(&self.id, status, url));
        }
    }

    fn on_url(&self, url: String) {
        debug!(service_id = %self.id, url = %url, "Service URL discovered");
        let status = {
            let mut state = self.state.write();
            state.lifecycle.set_url(url.clone());
            state.lifecycle.status()
        };
        self.publisher
            .publish(ServiceEvent::status_update(&self.id, status, Some(url)));
    }

    fn on_status(&self, reported: ServiceStatus) {
        let (status, url) = {
            let mut state = self.state.write();
            let status = state.lifecycle.apply(reported);
            (status, state.lifecycle.url().map(str::to_string))
        };
        debug!(service_id = %self.id, reported = %reported, status = %status, "Service status changed");
        self.publisher
            .publish(ServiceEvent::status_update(&self.id, status, url));
    }
}
