//! Event payloads and their write-path context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::table::Table;

/// A semi-structured event: field names mapped to JSON values. After
/// flattening all keys match `[a-z0-9_]+` and all values are scalars.
pub type Record = serde_json::Map<String, Value>;

/// Queue element wrapping an event payload with its dequeue bookkeeping.
/// Serialised into the durable queue and decoded on pop; a payload that does
/// not decode back into this shape is reported as a corrupted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub payload: Record,
    pub dequeued_time: DateTime<Utc>,
    pub token_id: String,
}

/// Dead-letter entry for events that failed with a non-connection error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEvent {
    pub event: Vec<u8>,
    pub error: String,
    pub event_id: String,
}

/// Everything the destination write path needs to know about one event.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub destination_id: String,
    pub event_id: String,
    pub token_id: String,
    /// Producer tag, e.g. an HTTP API name or a connector image.
    pub src: String,
    pub raw_event: Value,
    /// Flattened representation that is actually inserted.
    pub processed_event: Record,
    /// Desired table schema derived from the event; replaced with the actual
    /// warehouse schema once the table is ensured.
    pub table: Table,
    pub cache_disabled: bool,
}

/// Extracts a destination's unique event identifier from a raw event by a
/// `/`-separated field path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueId {
    field: String,
}

impl UniqueId {
    pub fn new(field: impl Into<String>) -> UniqueId {
        UniqueId { field: field.into() }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn extract(&self, event: &Value) -> Option<String> {
        let mut current = event;
        for segment in self.field.split('/') {
            current = current.as_object()?.get(segment)?;
        }
        match current {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_id_walks_nested_path() {
        let event = json!({"ctx": {"event_id": "abc-1"}, "flat": 7});

        assert_eq!(
            UniqueId::new("ctx/event_id").extract(&event),
            Some("abc-1".to_string())
        );
        assert_eq!(UniqueId::new("flat").extract(&event), Some("7".to_string()));
        assert_eq!(UniqueId::new("ctx/missing").extract(&event), None);
    }

    #[test]
    fn timed_event_round_trips_through_serde() {
        let mut payload = Record::new();
        payload.insert("a".into(), json!(1));
        let event = TimedEvent {
            payload,
            dequeued_time: Utc::now(),
            token_id: "token".into(),
        };

        let bytes = serde_json::to_vec(&event).unwrap();
        let decoded: TimedEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, event);
    }
}
