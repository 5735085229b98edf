//! Outbound status events for external collaborators.
//!
//! Every status-determining transition (initial submission outcome, review
//! resolution, reviewer override) is published on a broadcast channel. The
//! scoring and notification subsystems are consumers of this channel; nothing
//! in this core calls them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What caused a record's status to be (re)determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCause {
    Submission,
    Review,
    Override,
}

/// A status-determining transition on an attendance record.
///
/// `old_status` is `None` for the initial submission outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub record_id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub old_status: Option<String>,
    pub new_status: String,
    pub cause: StatusCause,
    pub occurred_at: DateTime<Utc>,
}

/// Topic-less broadcast bus for [`StatusEvent`]s.
///
/// Cloning is cheap; all clones share the same underlying channel. Emission
/// never blocks and never fails the emitting operation: if no consumer is
/// subscribed the event is dropped, which matches the "external collaborator"
/// boundary (this core does not depend on downstream availability).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all current subscribers.
    pub fn emit(&self, event: StatusEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(error = %e, "No subscribers for status event");
        }
    }

    /// Creates a new subscription starting at the current position.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
