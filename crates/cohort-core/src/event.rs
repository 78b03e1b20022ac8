use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Kind of progress event emitted during a team run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was admitted into the task store.
    TaskCreated,
    /// A ready task was dispatched to its collaborator.
    TaskAssigned,
    /// A collaborator (manager or member) answered.
    AgentResponse,
    /// A task moved to a new status.
    TaskStatusChanged,
    /// A task failed or a proposal was rejected.
    TaskError,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::TaskCreated => write!(f, "task_created"),
            EventKind::TaskAssigned => write!(f, "task_assigned"),
            EventKind::AgentResponse => write!(f, "agent_response"),
            EventKind::TaskStatusChanged => write!(f, "task_status_changed"),
            EventKind::TaskError => write!(f, "task_error"),
        }
    }
}

/// A single structured event on the team progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamEvent {
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
    /// Name of the collaborator (or `"team"`) the event is about.
    pub actor: String,
    /// Human-readable one-line summary.
    pub summary: String,
    /// Structured payload. `null` when the event carries nothing extra.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl TeamEvent {
    /// Event stamped with the current time and empty details.
    pub fn new(kind: EventKind, actor: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            actor: actor.into(),
            summary: summary.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Attach a structured payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Receives team events. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// Accept one event.
    fn emit(&self, event: TeamEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: TeamEvent) {}
}

/// Forwards events to `tracing` as structured records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TeamEvent) {
        info!(
            kind = %event.kind,
            actor = %event.actor,
            details = %event.details,
            "{}",
            event.summary
        );
    }
}

/// Pushes events onto an unbounded channel for an external consumer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TeamEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TeamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TeamEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TeamEvent>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events received so far.
    pub fn events(&self) -> Vec<TeamEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind, in arrival order.
    pub fn of_kind(&self, kind: EventKind) -> Vec<TeamEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// True when nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: TeamEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_by_kind() {
        let sink = MemorySink::new();
        sink.emit(TeamEvent::new(EventKind::TaskCreated, "writer", "task-1 created"));
        sink.emit(TeamEvent::new(EventKind::TaskError, "writer", "task-1 failed"));
        sink.emit(TeamEvent::new(EventKind::TaskCreated, "critic", "task-2 created"));

        assert_eq!(sink.len(), 3);
        let created = sink.of_kind(EventKind::TaskCreated);
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].actor, "critic");
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(
            TeamEvent::new(EventKind::TaskAssigned, "researcher", "task-3 dispatched")
                .with_details(serde_json::json!({"task_id": "task-3"})),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::TaskAssigned);
        assert_eq!(event.details["task_id"], "task-3");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(TeamEvent::new(EventKind::AgentResponse, "manager", "ignored"));
    }

    #[test]
    fn test_event_kind_serialization() {
        let json = serde_json::to_string(&EventKind::TaskStatusChanged).unwrap();
        assert_eq!(json, "\"task_status_changed\"");
        assert_eq!(EventKind::TaskError.to_string(), "task_error");
    }
}
