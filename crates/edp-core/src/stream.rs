//! Units of work produced by CLI connector runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::event::Record;
use crate::types::BatchHeader;

/// One logical table from a connector's output, batched for the destination.
#[derive(Debug, Clone)]
pub struct StreamRepresentation {
    pub namespace: Option<String>,
    pub stream_name: String,
    pub batch_header: BatchHeader,
    pub key_fields: Vec<String>,
    pub objects: Vec<Record>,
    /// Truncate the target table before applying the first batch of this
    /// run. Flips to false after the first successful consume so later
    /// batches append.
    pub need_clean: bool,
}

/// Everything one sync run hands to the destination: per-stream batches plus
/// the opaque resume cursor.
#[derive(Debug, Clone, Default)]
pub struct CliOutputRepresentation {
    /// Resume state for incremental sync; persisted only when the enclosing
    /// batch commit succeeds.
    pub state: Option<Value>,
    pub streams: BTreeMap<String, StreamRepresentation>,
}

/// Consumes batched connector output, typically by writing it into a
/// destination and checkpointing `state`.
#[async_trait]
pub trait CliDataConsumer: Send + Sync {
    async fn consume(&self, output: &CliOutputRepresentation) -> anyhow::Result<()>;
}
