//! Typed event queue over the durable queue SPI.
//!
//! Wraps payloads into [`TimedEvent`] envelopes, emits enqueue/dequeue
//! counters, and reports queue size periodically until closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use edp_core::counters;
use edp_core::event::{Record, TimedEvent};
use edp_core::queue::{Queue, QueueError};

const SIZE_REPORT_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// FIFO of [`TimedEvent`]s for one destination, backed by a pluggable
/// durable queue. Single-consumer-safe; concurrent consumers are the
/// caller's coordination problem.
pub struct EventQueue {
    namespace: String,
    identifier: String,
    queue: Arc<dyn Queue>,
    cancel: CancellationToken,
}

impl EventQueue {
    /// Wraps `queue` and spawns the size monitor. The monitor exits when the
    /// queue is closed, even while parked on its ticker.
    pub fn new(
        namespace: impl Into<String>,
        identifier: impl Into<String>,
        queue: Arc<dyn Queue>,
    ) -> EventQueue {
        let namespace = namespace.into();
        let identifier = identifier.into();
        counters::initial_queue_size(&identifier, queue.size());

        let cancel = CancellationToken::new();
        tokio::spawn(monitor(
            namespace.clone(),
            identifier.clone(),
            queue.clone(),
            cancel.clone(),
        ));

        EventQueue {
            namespace,
            identifier,
            queue,
            cancel,
        }
    }

    pub fn size(&self) -> usize {
        self.queue.size()
    }

    pub async fn enqueue(&self, payload: Record, token_id: &str) {
        self.enqueue_timed(payload, Utc::now(), token_id).await
    }

    /// Enqueues with an explicit dequeue timestamp; used when an event is
    /// put back after a transient failure so its original time survives.
    pub async fn enqueue_timed(&self, payload: Record, time: DateTime<Utc>, token_id: &str) {
        let event = TimedEvent {
            payload,
            dequeued_time: time,
            token_id: token_id.to_string(),
        };

        let bytes = match serde_json::to_vec(&event) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(queue = %self.identifier, %err, "skipping event: can't serialize queue element");
                return;
            }
        };

        if let Err(err) = self.queue.push(bytes).await {
            warn!(queue = %self.identifier, %err, "skipping event: can't put element to the queue");
            return;
        }

        counters::enqueued_event(&self.identifier);
    }

    /// Blocks until an element is available or the queue is closed. An
    /// element that does not decode back into a [`TimedEvent`] is a
    /// [`QueueError::CorruptedElement`].
    pub async fn dequeue_block(&self) -> Result<TimedEvent, QueueError> {
        let bytes = self.queue.pop().await?;

        counters::dequeued_event(&self.identifier);

        serde_json::from_slice::<TimedEvent>(&bytes).map_err(|err| {
            QueueError::CorruptedElement(format!(
                "wrong element shape in queue {}_{}: {err}",
                self.namespace, self.identifier
            ))
        })
    }

    /// Closes the underlying queue and stops the monitor. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        self.queue.close();
    }
}

async fn monitor(
    namespace: String,
    identifier: String,
    queue: Arc<dyn Queue>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SIZE_REPORT_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let size = queue.size();
                counters::queue_size(&identifier, size);
                let queue_id = format!("{namespace}_{identifier}");
                info!(queue = %queue_id, size, "current queue size");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_queue::InMemoryQueue;
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn round_trips_timed_events() {
        let queue = EventQueue::new("events", "dest-1", Arc::new(InMemoryQueue::new()));

        queue
            .enqueue(record(&[("page", json!("/home"))]), "token-a")
            .await;

        let event = queue.dequeue_block().await.unwrap();
        assert_eq!(event.token_id, "token-a");
        assert_eq!(event.payload["page"], json!("/home"));
        queue.close();
    }

    #[tokio::test]
    async fn dequeue_after_close_returns_sentinel() {
        let queue = EventQueue::new("events", "dest-1", Arc::new(InMemoryQueue::new()));
        queue.close();
        queue.close(); // close is idempotent

        assert!(matches!(queue.dequeue_block().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn corrupted_elements_are_reported_as_bugs() {
        let inner = Arc::new(InMemoryQueue::new());
        let queue = EventQueue::new("events", "dest-1", inner.clone());

        inner.push(b"not a timed event".to_vec()).await.unwrap();

        assert!(matches!(
            queue.dequeue_block().await,
            Err(QueueError::CorruptedElement(_))
        ));
        queue.close();
    }
}
