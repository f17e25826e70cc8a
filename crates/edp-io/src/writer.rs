//! Destination write path: ensure table, insert, retry once on schema
//! drift, and account the outcome.

use std::sync::Arc;

use rand::Rng;
use tracing::error;

use edp_core::adapter::{AdapterError, SqlAdapter, TableField};
use edp_core::cache::{EventsCache, ObjectLogger};
use edp_core::counters;
use edp_core::event::{EventContext, FailedEvent, Record};
use edp_core::flatten::{FlattenError, Flattener, JsonFlattener};
use edp_core::table::Table;
use edp_core::types::{BatchHeader, DataType, Field};

use crate::table_helper::{SchemaError, TableHelper};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Insert(#[from] AdapterError),
}

impl WriteError {
    /// Connection errors are transient: the event is redelivered by the
    /// queue instead of being dead-lettered.
    pub fn is_connection_error(&self) -> bool {
        match self {
            WriteError::Schema(err) => err.is_connection_error(),
            WriteError::Insert(err) => err.is_connection_error(),
        }
    }
}

/// Client-side load balancing over a destination's warehouse nodes.
pub trait AdapterPicker: Send + Sync {
    /// Returns an index in `0..count`; `count` is always at least 1.
    fn pick(&self, count: usize) -> usize;
}

/// Uniform random fan-out.
pub struct RandomPicker;

impl AdapterPicker for RandomPicker {
    fn pick(&self, count: usize) -> usize {
        rand::thread_rng().gen_range(0..count)
    }
}

/// Writes events into one destination, fanning out over its configured
/// (adapter, table helper) pairs.
pub struct DestinationWriter {
    destination_id: String,
    pairs: Vec<(Arc<dyn SqlAdapter>, Arc<TableHelper>)>,
    picker: Box<dyn AdapterPicker>,
    events_cache: Arc<dyn EventsCache>,
    fallback_logger: Arc<dyn ObjectLogger>,
    archive_logger: Arc<dyn ObjectLogger>,
    flattener: JsonFlattener,
}

impl DestinationWriter {
    pub fn new(
        destination_id: impl Into<String>,
        pairs: Vec<(Arc<dyn SqlAdapter>, Arc<TableHelper>)>,
        events_cache: Arc<dyn EventsCache>,
        fallback_logger: Arc<dyn ObjectLogger>,
        archive_logger: Arc<dyn ObjectLogger>,
    ) -> DestinationWriter {
        assert!(!pairs.is_empty(), "a destination needs at least one adapter");
        DestinationWriter {
            destination_id: destination_id.into(),
            pairs,
            picker: Box::new(RandomPicker),
            events_cache,
            fallback_logger,
            archive_logger,
            flattener: JsonFlattener::default(),
        }
    }

    pub fn with_picker(mut self, picker: Box<dyn AdapterPicker>) -> DestinationWriter {
        self.picker = picker;
        self
    }

    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    pub fn map_table_schema(&self, batch_header: &BatchHeader) -> Table {
        let (_, table_helper) = self.get_adapters();
        table_helper.map_table_schema(batch_header)
    }

    /// Ensures the table and sends the event to the destination, with one
    /// retry after a cache rebuild. Every outcome is accounted; successful
    /// events are archived.
    pub async fn insert(&self, ctx: &mut EventContext) -> Result<(), WriteError> {
        let result = self.insert_with_retry(ctx).await;

        self.account_result(ctx, &result);

        if result.is_ok() {
            self.archive_logger.consume(&ctx.raw_event, &ctx.token_id);
        }

        result
    }

    async fn insert_with_retry(&self, ctx: &mut EventContext) -> Result<(), WriteError> {
        let (adapter, table_helper) = self.get_adapters();

        let data_schema = ctx.table.clone();

        let db_table = match table_helper
            .ensure_table_with_caching(&self.destination_id, &ctx.table)
            .await
        {
            Ok(table) => table,
            Err(_) => return self.retry_insert(adapter, table_helper, ctx, &data_schema).await,
        };

        ctx.table = db_table;

        if adapter.insert(ctx).await.is_err() {
            return self.retry_insert(adapter, table_helper, ctx, &data_schema).await;
        }

        Ok(())
    }

    /// Renews the cached schema and retries exactly once; the second failure
    /// surfaces to the caller.
    async fn retry_insert(
        &self,
        adapter: &Arc<dyn SqlAdapter>,
        table_helper: &Arc<TableHelper>,
        ctx: &mut EventContext,
        data_schema: &Table,
    ) -> Result<(), WriteError> {
        table_helper
            .refresh_table_schema(&self.destination_id, data_schema)
            .await?;

        let db_table = table_helper
            .ensure_table_with_caching(&self.destination_id, data_schema)
            .await?;

        ctx.table = db_table;

        adapter.insert(ctx).await?;

        Ok(())
    }

    /// Routes the insert outcome to counters, the events cache, and the
    /// fallback log. Connection errors skip the fallback: the event stays on
    /// the queue and is redelivered.
    pub fn account_result(&self, ctx: &EventContext, result: &Result<(), WriteError>) {
        match result {
            Ok(()) => self.success_event(ctx),
            Err(err) if err.is_connection_error() => self.error_event(false, ctx, err),
            Err(err) => self.error_event(true, ctx, err),
        }
    }

    fn success_event(&self, ctx: &EventContext) {
        counters::success_token_event(&ctx.token_id, &self.destination_id);
        self.events_cache.succeed(ctx);
    }

    fn error_event(&self, fallback: bool, ctx: &EventContext, err: &WriteError) {
        counters::error_token_event(&ctx.token_id, &self.destination_id);
        self.events_cache.error(
            ctx.cache_disabled,
            &self.destination_id,
            &ctx.event_id,
            &err.to_string(),
        );

        if fallback {
            self.fallback(FailedEvent {
                event: serde_json::to_vec(&ctx.raw_event).unwrap_or_default(),
                error: err.to_string(),
                event_id: ctx.event_id.clone(),
            });
        }
    }

    /// Records an upstream decision to drop a valid event (filter, unknown
    /// schema, ...).
    pub fn skip_event(&self, ctx: &EventContext, reason: &str) {
        counters::skip_token_event(&ctx.token_id, &self.destination_id);
        self.events_cache.skip(
            ctx.cache_disabled,
            &self.destination_id,
            &ctx.event_id,
            reason,
        );
    }

    fn fallback(&self, failed: FailedEvent) {
        match serde_json::to_value(&failed) {
            Ok(object) => self.fallback_logger.consume_any(object),
            Err(err) => error!(
                destination = %self.destination_id,
                event_id = %failed.event_id,
                %err,
                "can't serialize failed event for the fallback log"
            ),
        }
    }

    /// Shows how one raw event would land: flattened fields with their
    /// mapped SQL types and values. Nothing is written.
    pub fn dry_run(&self, table_name: &str, raw_event: &Record) -> Result<Vec<TableField>, FlattenError> {
        let flattened = self.flattener.flatten_object(raw_event)?;
        let header = infer_batch_header(table_name, &flattened);
        let table = self.map_table_schema(&header);

        Ok(flattened
            .into_iter()
            .map(|(field, value)| {
                let sql_type = table
                    .columns
                    .get(&field)
                    .map(|column| column.sql_type.clone())
                    .unwrap_or_default();
                TableField {
                    field,
                    sql_type,
                    value,
                }
            })
            .collect())
    }

    fn get_adapters(&self) -> (&Arc<dyn SqlAdapter>, &Arc<TableHelper>) {
        let index = self.picker.pick(self.pairs.len());
        let (adapter, table_helper) = &self.pairs[index];
        (adapter, table_helper)
    }
}

/// Derives a stream schema from an already-flattened record.
pub fn infer_batch_header(table_name: &str, record: &Record) -> BatchHeader {
    let mut header = BatchHeader::new(table_name);
    for (name, value) in record {
        header
            .fields
            .insert(name.clone(), Field::new(DataType::from_value(value)));
    }
    header
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared mocks for write-path tests.

    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adapter whose `insert` outcomes are scripted per test.
    #[derive(Default)]
    pub struct ScriptedAdapter {
        pub tables: Mutex<HashMap<String, Table>>,
        pub insert_results: Mutex<VecDeque<Result<(), AdapterError>>>,
        pub insert_calls: AtomicUsize,
        pub truncate_calls: AtomicUsize,
        pub type_mapping: edp_core::adapter::TypeMapping,
    }

    impl ScriptedAdapter {
        pub fn new() -> ScriptedAdapter {
            let mut type_mapping = BTreeMap::new();
            type_mapping.insert(DataType::Int64, "bigint".to_string());
            type_mapping.insert(DataType::Float64, "double precision".to_string());
            type_mapping.insert(DataType::String, "text".to_string());
            type_mapping.insert(DataType::Bool, "boolean".to_string());
            ScriptedAdapter {
                type_mapping,
                ..ScriptedAdapter::default()
            }
        }

        pub fn script_inserts(&self, results: Vec<Result<(), AdapterError>>) {
            *self.insert_results.lock() = results.into();
        }
    }

    #[async_trait::async_trait]
    impl SqlAdapter for ScriptedAdapter {
        fn destination_type(&self) -> &str {
            "mock"
        }

        fn type_mapping(&self) -> &edp_core::adapter::TypeMapping {
            &self.type_mapping
        }

        async fn get_table_schema(&self, table_name: &str) -> Result<Table, AdapterError> {
            Ok(self
                .tables
                .lock()
                .get(table_name)
                .cloned()
                .unwrap_or_else(|| Table::new(table_name)))
        }

        async fn create_table(&self, table: &Table) -> Result<(), AdapterError> {
            self.tables.lock().insert(table.name.clone(), table.clone());
            Ok(())
        }

        async fn patch_table_schema(&self, diff: &Table) -> Result<(), AdapterError> {
            let mut tables = self.tables.lock();
            let table = tables
                .entry(diff.name.clone())
                .or_insert_with(|| Table::new(&diff.name));
            for (name, column) in &diff.columns {
                table.columns.insert(name.clone(), column.clone());
            }
            Ok(())
        }

        async fn truncate(&self, _table_name: &str) -> Result<(), AdapterError> {
            self.truncate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn insert(&self, _ctx: &EventContext) -> Result<(), AdapterError> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            self.insert_results.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    /// Events cache recording which outcome was reported per event id.
    #[derive(Default)]
    pub struct RecordingCache {
        pub succeeded: Mutex<Vec<String>>,
        pub errored: Mutex<Vec<(String, String)>>,
        pub skipped: Mutex<Vec<(String, String)>>,
    }

    impl EventsCache for RecordingCache {
        fn succeed(&self, ctx: &EventContext) {
            self.succeeded.lock().push(ctx.event_id.clone());
        }

        fn error(&self, _cache_disabled: bool, _destination_id: &str, event_id: &str, message: &str) {
            self.errored.lock().push((event_id.to_string(), message.to_string()));
        }

        fn skip(&self, _cache_disabled: bool, _destination_id: &str, event_id: &str, message: &str) {
            self.skipped.lock().push((event_id.to_string(), message.to_string()));
        }
    }

    /// Object logger capturing consumed objects.
    #[derive(Default)]
    pub struct RecordingLogger {
        pub objects: Mutex<Vec<Value>>,
    }

    impl ObjectLogger for RecordingLogger {
        fn consume(&self, object: &Value, _token_id: &str) {
            self.objects.lock().push(object.clone());
        }

        fn consume_any(&self, object: Value) {
            self.objects.lock().push(object);
        }

        fn close(&self) {}
    }

    /// Always picks the first pair, keeping tests deterministic.
    pub struct FirstPicker;

    impl AdapterPicker for FirstPicker {
        fn pick(&self, _count: usize) -> usize {
            0
        }
    }
}
