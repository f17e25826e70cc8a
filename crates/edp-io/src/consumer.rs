//! Consumers feeding the destination write path: the streaming queue
//! consumer and the batch consumer for CLI connector output.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use edp_core::event::{EventContext, Record, TimedEvent, UniqueId};
use edp_core::flatten::{Flattener, JsonFlattener};
use edp_core::queue::QueueError;
use edp_core::stream::{CliDataConsumer, CliOutputRepresentation};

use crate::event_queue::EventQueue;
use crate::table_helper::TableHelper;
use crate::writer::{infer_batch_header, DestinationWriter};

/// Pulls events off one destination's queue and writes them out until the
/// queue is closed. Transient failures put the event back for redelivery.
pub struct QueueConsumer {
    queue: Arc<EventQueue>,
    writer: Arc<DestinationWriter>,
    flattener: Box<dyn Flattener>,
    unique_id: UniqueId,
    table_name: String,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<EventQueue>,
        writer: Arc<DestinationWriter>,
        unique_id: UniqueId,
        table_name: impl Into<String>,
    ) -> QueueConsumer {
        QueueConsumer {
            queue,
            writer,
            flattener: Box::new(JsonFlattener::default()),
            unique_id,
            table_name: table_name.into(),
        }
    }

    /// Runs until the queue is closed and drained. Corrupted elements are
    /// logged as system errors and skipped.
    pub async fn run(&self) {
        loop {
            match self.queue.dequeue_block().await {
                Ok(event) => self.handle(event).await,
                Err(QueueError::Closed) => {
                    info!(destination = %self.writer.destination_id(), "queue closed, stopping consumer");
                    return;
                }
                Err(err) => {
                    error!(destination = %self.writer.destination_id(), %err, "system error: unprocessable queue element");
                }
            }
        }
    }

    async fn handle(&self, event: TimedEvent) {
        let raw_event = Value::Object(event.payload.clone());
        let event_id = self
            .unique_id
            .extract(&raw_event)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let processed_event = match self.flattener.flatten_object(&event.payload) {
            Ok(record) => record,
            Err(err) => {
                let ctx = EventContext {
                    destination_id: self.writer.destination_id().to_string(),
                    event_id,
                    token_id: event.token_id.clone(),
                    src: String::new(),
                    raw_event,
                    processed_event: Record::new(),
                    table: edp_core::table::Table::new(&self.table_name),
                    cache_disabled: false,
                };
                self.writer.skip_event(&ctx, &err.to_string());
                return;
            }
        };

        let header = infer_batch_header(&self.table_name, &processed_event);
        let table = self.writer.map_table_schema(&header);

        let mut ctx = EventContext {
            destination_id: self.writer.destination_id().to_string(),
            event_id,
            token_id: event.token_id.clone(),
            src: String::new(),
            raw_event,
            processed_event,
            table,
            cache_disabled: false,
        };

        if let Err(err) = self.writer.insert(&mut ctx).await {
            if err.is_connection_error() {
                // transient: put the event back, preserving its timestamp
                self.queue
                    .enqueue_timed(event.payload, event.dequeued_time, &event.token_id)
                    .await;
            }
        }
    }
}

/// Persists the resume cursor of a sync run.
pub trait StateStore: Send + Sync {
    fn save(&self, state: &Value) -> anyhow::Result<()>;
}

/// Writes batched CLI connector output into a destination and checkpoints
/// sync state after every committed batch.
pub struct SyncConsumer {
    destination_id: String,
    adapter: Arc<dyn edp_core::adapter::SqlAdapter>,
    table_helper: Arc<TableHelper>,
    flattener: JsonFlattener,
    state_store: Arc<dyn StateStore>,
    table_name_prefix: String,
}

impl SyncConsumer {
    pub fn new(
        destination_id: impl Into<String>,
        adapter: Arc<dyn edp_core::adapter::SqlAdapter>,
        table_helper: Arc<TableHelper>,
        state_store: Arc<dyn StateStore>,
        table_name_prefix: impl Into<String>,
    ) -> SyncConsumer {
        SyncConsumer {
            destination_id: destination_id.into(),
            adapter,
            table_helper,
            flattener: JsonFlattener::default(),
            state_store,
            table_name_prefix: table_name_prefix.into(),
        }
    }
}

#[async_trait]
impl CliDataConsumer for SyncConsumer {
    async fn consume(&self, output: &CliOutputRepresentation) -> anyhow::Result<()> {
        for (stream_name, stream) in &output.streams {
            if stream.objects.is_empty() {
                continue;
            }

            let mut header = stream.batch_header.clone();
            header.table_name = format!("{}{}", self.table_name_prefix, header.table_name);

            let mut flattened = Vec::with_capacity(stream.objects.len());
            for object in &stream.objects {
                flattened.push(self.flattener.flatten_object(object)?);
            }

            // catalog columns plus whatever the data actually carries
            let mut table = self.table_helper.map_table_schema(&header);
            for record in &flattened {
                let inferred = self
                    .table_helper
                    .map_table_schema(&infer_batch_header(&header.table_name, record));
                for (name, column) in inferred.columns {
                    table.columns.entry(name).or_insert(column);
                }
            }
            table.pk_fields = stream.key_fields.iter().cloned().collect();

            let db_table = self
                .table_helper
                .ensure_table_without_caching(&self.destination_id, &table)
                .await?;

            if stream.need_clean {
                self.adapter.truncate(&db_table.name).await?;
            }

            for (object, processed_event) in stream.objects.iter().zip(flattened) {
                let ctx = EventContext {
                    destination_id: self.destination_id.clone(),
                    event_id: Uuid::new_v4().to_string(),
                    token_id: String::new(),
                    src: stream_name.clone(),
                    raw_event: Value::Object(object.clone()),
                    processed_event,
                    table: db_table.clone(),
                    cache_disabled: true,
                };
                self.adapter.insert(&ctx).await?;
            }

            info!(
                destination = %self.destination_id,
                stream = %stream_name,
                table = %db_table.name,
                rows = stream.objects.len(),
                "stored sync batch"
            );
        }

        if let Some(state) = &output.state {
            self.state_store.save(state)?;
        }

        Ok(())
    }
}
