//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the monitor, the
//! submitter, the HTTP handlers and the background consumers.

use chrono::{DateTime, Utc};
use renderwatch_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Entity type used for production job events.
pub const ENTITY_PRODUCTION_JOB: &str = "production_job";

// ---------------------------------------------------------------------------
// MonitorEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job.
///
/// Constructed via [`MonitorEvent::new`] (or [`MonitorEvent::for_job`])
/// and enriched with [`with_source`](MonitorEvent::with_source) and
/// [`with_payload`](MonitorEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,
    pub source_entity_type: Option<String>,
    pub source_entity_id: Option<DbId>,
    /// Event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl MonitorEvent {
    /// An event with only `event_type` set and an empty object payload.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_entity_type: None,
            source_entity_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for an event sourced from a production job.
    pub fn for_job(event_type: impl Into<String>, job_id: DbId) -> Self {
        Self::new(event_type).with_source(ENTITY_PRODUCTION_JOB, job_id)
    }

    pub fn with_source(mut self, entity_type: impl Into<String>, entity_id: DbId) -> Self {
        self.source_entity_type = Some(entity_type.into());
        self.source_entity_id = Some(entity_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// The job id when this event is about a production job.
    pub fn job_id(&self) -> Option<DbId> {
        match self.source_entity_type.as_deref() {
            Some(ENTITY_PRODUCTION_JOB) => self.source_entity_id,
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out bus: every subscriber independently receives every event.
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped silently if there are
    /// none.
    pub fn publish(&self, event: MonitorEvent) {
        tracing::debug!(
            event_type = %event.event_type,
            job_id = ?event.job_id(),
            "Publishing event",
        );
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
