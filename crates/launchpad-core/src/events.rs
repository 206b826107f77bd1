//! Notifications published to observers
//!
//! The envelope is `{ "type": "newLog" | "statusUpdate", "serviceId", "data" }`.
//! Delivery is fire-and-forget: a publisher must not block the aggregator.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::{LogEntry, ServiceStatus};

/// Event envelope delivered to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    pub service_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Typed event body, serialised as `type` + `data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    NewLog {
        log: LogEntry,
    },
    StatusUpdate {
        status: ServiceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

impl ServiceEvent {
    pub fn new_log(service_id: impl Into<String>, log: LogEntry) -> Self {
        Self {
            service_id: service_id.into(),
            payload: EventPayload::NewLog { log },
        }
    }

    pub fn status_update(
        service_id: impl Into<String>,
        status: ServiceStatus,
        url: Option<String>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            payload: EventPayload::StatusUpdate { status, url },
        }
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::NewLog { .. } => "newLog",
            EventPayload::StatusUpdate { .. } => "statusUpdate",
        }
    }
}

/// Sink for service events, injected into each aggregator
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ServiceEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventPublisher;

impl EventPublisher for NoOpEventPublisher {
    fn publish(&self, _event: ServiceEvent) {}
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::UnboundedSender<ServiceEvent>,
}

impl ChannelEventPublisher {
    /// Publisher plus the receiver observers read from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServiceEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: ServiceEvent) {
        // A closed receiver means nobody is observing any more.
        let _ = self.sender.send(event);
    }
}

/// Collects events in memory, for tests and snapshots
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: Mutex<Vec<ServiceEvent>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event published so far
    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: ServiceEvent) {
        self.events.lock().push(event);
    }
}
