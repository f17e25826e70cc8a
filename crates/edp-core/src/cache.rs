//! Observational sinks: events cache, object stores, append-only loggers.
//!
//! These are contracts only. The write path records what happened to every
//! event through them; the implementations (Redis cache, file archives,
//! object storage) live outside the core.

use serde_json::Value;

use crate::event::EventContext;

/// Per-destination cache of recent event outcomes, keyed by event id.
pub trait EventsCache: Send + Sync {
    fn succeed(&self, ctx: &EventContext);

    fn error(&self, cache_disabled: bool, destination_id: &str, event_id: &str, message: &str);

    fn skip(&self, cache_disabled: bool, destination_id: &str, event_id: &str, message: &str);
}

/// Cache that records nothing. Useful when a destination disables caching
/// entirely.
pub struct NoopEventsCache;

impl EventsCache for NoopEventsCache {
    fn succeed(&self, _ctx: &EventContext) {}
    fn error(&self, _cache_disabled: bool, _destination_id: &str, _event_id: &str, _message: &str) {}
    fn skip(&self, _cache_disabled: bool, _destination_id: &str, _event_id: &str, _message: &str) {}
}

/// Named object store for raw payload persistence.
pub trait EventStore: Send + Sync {
    fn store(&self, file_name: &str, payload: &[u8]) -> anyhow::Result<()>;

    fn name(&self) -> &str;

    fn kind(&self) -> &str;

    fn close(&self) -> anyhow::Result<()>;
}

/// Append-only object sink. The archive logger receives raw events with
/// their token; the fallback (dead-letter) logger receives failed-event
/// envelopes.
pub trait ObjectLogger: Send + Sync {
    fn consume(&self, object: &Value, token_id: &str);

    fn consume_any(&self, object: Value);

    fn close(&self);
}
