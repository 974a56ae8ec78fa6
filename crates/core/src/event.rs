use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema tag stamped into every event payload. Payloads evolve
/// additively within a schema version.
pub const SCHEMA_VERSION: &str = "v1";

/// Topics published on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    SlaWarning,
    SlaOverdue,
    MetricsUpdated,
}

impl EventTopic {
    /// Dotted topic name as seen by subscribers.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskStatusChanged => "task.status_changed",
            Self::SlaWarning => "sla.warning",
            Self::SlaOverdue => "sla.overdue",
            Self::MetricsUpdated => "metrics.updated",
        }
    }
}

impl std::fmt::Display for EventTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record appended to the bus.
///
/// `event_id` is assigned by the bus as a monotonic sequence; events are
/// constructed with id 0 and stamped at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Bus-assigned monotonic sequence number. 0 until appended.
    pub event_id: u64,
    pub topic: EventTopic,
    pub timestamp: DateTime<Utc>,
    /// JSON payload carrying a `schema` field; consumers must treat it
    /// as an open map and tolerate added fields.
    pub payload: serde_json::Value,
    /// Task or email id this event refers to. Delivery is FIFO per
    /// correlation id.
    pub correlation_id: String,
}

impl Event {
    /// Create an event awaiting bus assignment, stamping the payload
    /// with the schema version.
    #[must_use]
    pub fn new(
        topic: EventTopic,
        correlation_id: impl Into<String>,
        mut payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        if let Some(map) = payload.as_object_mut() {
            map.entry("schema")
                .or_insert_with(|| serde_json::Value::String(SCHEMA_VERSION.to_owned()));
        }
        Self {
            event_id: 0,
            topic,
            timestamp,
            payload,
            correlation_id: correlation_id.into(),
        }
    }
}
