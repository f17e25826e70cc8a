//! Durable queue SPI.
//!
//! The persistence format is owned by the implementation (an on-disk FIFO in
//! production deployments); the core only moves serialised elements through
//! it. Redelivery after a consumer crash is the implementation's job, which
//! is what gives the pipeline its at-least-once guarantee.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Returned by `pop` once the queue is closed and drained, and by `push`
    /// after close.
    #[error("queue is closed")]
    Closed,
    /// An element came back in a shape the caller did not put in. A bug, not
    /// bad data.
    #[error("corrupted queue element: {0}")]
    CorruptedElement(String),
    #[error("queue i/o error: {0}")]
    Io(String),
}

/// FIFO over serialised elements. FIFO per single producer; concurrent
/// consumers are not serialised, that coordination belongs to the caller.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn push(&self, element: Vec<u8>) -> Result<(), QueueError>;

    /// Blocks until an element is available or the queue is closed.
    async fn pop(&self) -> Result<Vec<u8>, QueueError>;

    fn size(&self) -> usize;

    fn close(&self);
}
