//! In-memory implementation of the queue SPI.
//!
//! Used for single-node deployments and tests. Durable deployments plug in
//! an on-disk FIFO behind the same [`Queue`] trait; the wrapper in
//! [`crate::event_queue`] does not care which it gets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use edp_core::queue::{Queue, QueueError};

/// Unbounded FIFO over serialised elements. After `close`, pushes are
/// rejected and pops drain the remaining elements before returning the
/// closed sentinel.
#[derive(Default)]
pub struct InMemoryQueue {
    elements: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> InMemoryQueue {
        InMemoryQueue::default()
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn push(&self, element: Vec<u8>) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.elements.lock().push_back(element);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self) -> Result<Vec<u8>, QueueError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut elements = self.elements.lock();
                if let Some(element) = elements.pop_front() {
                    return Ok(element);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Err(QueueError::Closed);
                }
            }
            notified.await;
        }
    }

    fn size(&self) -> usize {
        self.elements.lock().len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
