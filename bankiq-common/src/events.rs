//! Event types for the BankIQ gateway event system
//!
//! Provides shared lifecycle event definitions and the EventBus used for the
//! admin SSE diagnostic stream.

use crate::chunk::{JobError, SourceKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Gateway lifecycle events.
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// One central enum keeps matching exhaustive across the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Job accepted and queued for dispatch
    JobQueued {
        job_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job dispatched; invocation in flight
    JobStarted {
        job_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached `completed`
    JobCompleted {
        job_id: Uuid,
        /// Data source that ultimately satisfied the request, if any
        source: Option<SourceKind>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached `failed` with a taxonomy error
    JobFailed {
        job_id: Uuid,
        error: JobError,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job reached `cancelled` on client request
    JobCancelled {
        job_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Cache invalidation via the admin surface
    CacheCleared {
        /// Cleared category name, or None for a full clear
        category: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AgentEvent {
    /// Event type name used as the SSE event field.
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::JobQueued { .. } => "JobQueued",
            AgentEvent::JobStarted { .. } => "JobStarted",
            AgentEvent::JobCompleted { .. } => "JobCompleted",
            AgentEvent::JobFailed { .. } => "JobFailed",
            AgentEvent::JobCancelled { .. } => "JobCancelled",
            AgentEvent::CacheCleared { .. } => "CacheCleared",
        }
    }
}

/// Broadcast bus for lifecycle events.
///
/// Backed by `tokio::broadcast`: every subscriber receives every event
/// emitted after subscription; slow subscribers drop oldest events once the
/// channel capacity is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring whether anyone is listening.
    ///
    /// Lifecycle events are diagnostics; an empty audience is not an error.
    pub fn emit_lossy(&self, event: AgentEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
