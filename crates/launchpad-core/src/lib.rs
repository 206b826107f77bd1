//! Process supervision engine for local development services
//!
//! Launchpad keeps a handful of dev servers (`npm run dev`, `dotnet run`, ...)
//! running on one machine: it spawns them, reassembles and classifies their
//! output, detects the URL they listen on and tears them down together with
//! their descendants.
//!
//! # Architecture
//!
//! ```text
//!  ServiceRegistry ── id ──► Service (aggregator) ──► EventPublisher
//!                              │  ▲
//!                    control   │  │ logs / urls / statuses (bounded, lossy)
//!                              ▼  │
//!                            Runner ── FamilyStrategy (npm, dotnet)
//!                              │
//!          ExecutableResolver, ProcessSearch, Signaller (launchpad-process)
//! ```
//!
//! - `runner`: one child per service, cleanup of stale processes before start,
//!   interrupt then group kill on stop
//! - `classifier`: multi-line record reassembly, severity and URL discovery
//! - `lifecycle`: status transitions, `Initializing` promoted to `Running`
//! - `service`: rolling log buffer, status and URL, republished as events
//! - `registry`: add/remove/reload and the per-id control calls
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use launchpad_core::{
//!     ChannelEventPublisher, RunnerContext, ServiceConfig, ServiceEnv, ServiceRegistry,
//!     SettingsLoader,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = SettingsLoader::new().load()?;
//! let (publisher, mut events) = ChannelEventPublisher::new();
//! let registry = ServiceRegistry::new(Arc::new(RunnerContext::new(settings)), Arc::new(publisher));
//!
//! let id = registry.add(ServiceConfig::new("web", "/srv/web", "npm"), ServiceEnv::new());
//! registry.start(&id).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod classifier;
pub mod env;
pub mod error;
pub mod events;
pub mod family;
pub mod groups;
pub mod lifecycle;
pub mod registry;
pub mod runner;
pub mod service;
pub mod settings;
pub mod types;

pub use buffer::LogBuffer;
pub use classifier::{classify_level, Classified, OutputClassifier, OutputRules};
pub use env::merge_env;
pub use error::{Result, SupervisorError};
pub use events::{
    ChannelEventPublisher, EventPayload, EventPublisher, InMemoryEventPublisher,
    NoOpEventPublisher, ServiceEvent,
};
pub use family::{FamilyStrategy, LaunchMode, ProcessFamily};
pub use groups::{resolve_groups, GroupConfig, ResolvedService, ServicesDocument};
pub use lifecycle::Lifecycle;
pub use registry::{generate_id, FamilyFactory, ServiceRegistry};
pub use runner::{Runner, RunnerChannels, RunnerContext};
pub use service::{Service, ServiceInfo};
pub use settings::{SettingsLoader, SupervisorSettings};
pub use types::{LogEntry, LogLevel, OutputStream, ServiceConfig, ServiceEnv, ServiceStatus};
