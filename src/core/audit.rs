//! Audit sink implementations.
//!
//! Every scheduling decision that changes an action's placement or state is recorded as
//! an [`AuditEvent`] with a random event id.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::action::ActionId;

/// What happened to the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Accepted into the graph.
    Submit,
    /// Bound to an (implementation, worker) pair.
    Schedule,
    /// Capacity reserved and handed to the transport.
    Launch,
    /// Finished successfully.
    Complete,
    /// Finished with an error or could not be placed.
    Fail,
    /// Withdrawn before running.
    Cancel,
    /// Moved between workers by the optimizer.
    Migrate,
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related action.
    pub action: ActionId,
    /// Worker involved, if any.
    pub worker: Option<String>,
    /// Event kind.
    pub kind: AuditKind,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory audit sink. Clones share the same buffer, so a test can keep a
/// handle while the scheduler owns the boxed sink.
#[derive(Debug, Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events concerning one action, oldest first.
    #[must_use]
    pub fn events_for(&self, action: ActionId) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Helper to build an audit event with a fresh v4 id.
pub fn build_audit_event(
    action: ActionId,
    worker: Option<&str>,
    kind: AuditKind,
    payload: Option<String>,
    now_ms: u64,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        action,
        worker: worker.map(str::to_owned),
        kind,
        created_at_ms: now_ms,
        payload,
    }
}
