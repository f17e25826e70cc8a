//! Schema reconciliation with optimistic version fencing.
//!
//! [`TableHelper`] keeps warehouse table schemas in memory and evolves them
//! as new data arrives. After any outer change in the warehouse the table
//! version must be incremented in the coordination service; a cached version
//! older than the coordination service's means the cached schema is stale
//! and is refetched before any patch.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};

use edp_core::adapter::{AdapterError, SqlAdapter};
use edp_core::coordination::{CoordinationError, MonitorKeeper};
use edp_core::table::{SqlColumn, Table};
use edp_core::types::BatchHeader;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unable to lock table {table}: {source}")]
    Lock {
        table: String,
        #[source]
        source: CoordinationError,
    },
    #[error("error getting table {table} version: {source}")]
    Version {
        table: String,
        #[source]
        source: CoordinationError,
    },
    #[error("error getting table {table} schema: {source}")]
    Get {
        table: String,
        #[source]
        source: AdapterError,
    },
    #[error("error creating table {table}: {source}")]
    Create {
        table: String,
        #[source]
        source: AdapterError,
    },
    #[error("error patching table {table} schema: {source}")]
    Patch {
        table: String,
        #[source]
        source: AdapterError,
    },
}

impl SchemaError {
    /// True when the underlying failure was a transient adapter connection
    /// error rather than a schema problem.
    pub fn is_connection_error(&self) -> bool {
        match self {
            SchemaError::Get { source, .. }
            | SchemaError::Create { source, .. }
            | SchemaError::Patch { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }
}

/// Keeps table schemas in memory and updates them according to incoming
/// data, serialising migrations per (destination, table) through the
/// coordination service.
pub struct TableHelper {
    sql_adapter: Arc<dyn SqlAdapter>,
    monitor_keeper: Arc<dyn MonitorKeeper>,
    tables: RwLock<HashMap<String, Table>>,

    pk_fields: BTreeSet<String>,
    destination_type: String,
    stream_mode: bool,
    max_columns: usize,
}

impl TableHelper {
    /// Note: the adapter's type mapping must not be empty, otherwise fields
    /// without suggested SQL types are dropped from mapped schemas.
    pub fn new(
        sql_adapter: Arc<dyn SqlAdapter>,
        monitor_keeper: Arc<dyn MonitorKeeper>,
        pk_fields: BTreeSet<String>,
        max_columns: usize,
        stream_mode: bool,
    ) -> TableHelper {
        let destination_type = sql_adapter.destination_type().to_string();
        TableHelper {
            sql_adapter,
            monitor_keeper,
            tables: RwLock::new(HashMap::new()),
            pk_fields,
            destination_type,
            stream_mode,
            max_columns,
        }
    }

    /// Maps a stream schema into a SQL table schema through the adapter's
    /// type mapping. A field's destination-specific suggested SQL type wins
    /// over the mapping; a field whose type has no mapping is logged and
    /// dropped, never failed.
    pub fn map_table_schema(&self, batch_header: &BatchHeader) -> Table {
        let mut table = Table::new(&batch_header.table_name);
        table.pk_fields = self.pk_fields.clone();

        for (field_name, field) in &batch_header.fields {
            if let Some(suggested) = field.suggested_sql_type(&self.destination_type) {
                table.columns.insert(field_name.clone(), suggested.clone());
                continue;
            }

            match self.sql_adapter.type_mapping().get(&field.data_type()) {
                Some(sql_type) => {
                    table
                        .columns
                        .insert(field_name.clone(), SqlColumn::new(sql_type.clone()));
                }
                None => {
                    error!(
                        field = %field_name,
                        data_type = %field.data_type(),
                        destination_type = %self.destination_type,
                        "unknown column type mapping"
                    );
                }
            }
        }

        table
    }

    /// Ensures the table using the mode this helper was configured with:
    /// cached for stream destinations, uncached for batch destinations.
    pub async fn ensure(
        &self,
        destination_id: &str,
        data_schema: &Table,
    ) -> Result<Table, SchemaError> {
        self.ensure_table(destination_id, data_schema, self.stream_mode)
            .await
    }

    /// Streaming path: consults the local cache first. Must not be used when
    /// the destination may be mutated by anything other than this helper.
    pub async fn ensure_table_with_caching(
        &self,
        destination_id: &str,
        data_schema: &Table,
    ) -> Result<Table, SchemaError> {
        self.ensure_table(destination_id, data_schema, true).await
    }

    /// Batch path: always consults the warehouse.
    pub async fn ensure_table_without_caching(
        &self,
        destination_id: &str,
        data_schema: &Table,
    ) -> Result<Table, SchemaError> {
        self.ensure_table(destination_id, data_schema, false).await
    }

    /// Returns the actual warehouse schema for `data_schema.name`, creating
    /// the table or patching it with the missing columns as needed.
    async fn ensure_table(
        &self,
        destination_id: &str,
        data_schema: &Table,
        cache_table: bool,
    ) -> Result<Table, SchemaError> {
        let mut db_schema = if cache_table {
            self.get_cached_table_schema(destination_id, data_schema)
                .await?
        } else {
            self.get_or_create(destination_id, data_schema).await?
        };

        let mut diff = db_schema.diff(data_schema);
        if !diff.exists() {
            return Ok(db_schema);
        }

        // losing a column is worse than a wide table, so this guard warns
        // instead of failing
        if self.max_columns > 0 {
            let columns_count = db_schema.columns.len() + diff.columns.len();
            if columns_count > self.max_columns {
                warn!(
                    destination = %destination_id,
                    table = %db_schema.name,
                    columns_count,
                    max_columns = self.max_columns,
                    "column count exceeds the configured max_columns"
                );
            }
        }

        let _lock = self
            .monitor_keeper
            .lock(destination_id, &db_schema.name)
            .await
            .map_err(|source| {
                error!(table = %db_schema.name, %source, "system error: unable to lock table");
                SchemaError::Lock {
                    table: db_schema.name.clone(),
                    source,
                }
            })?;

        // the table may have been patched locally while we waited for the lock
        diff = db_schema.diff(data_schema);
        if !diff.exists() {
            return Ok(db_schema);
        }

        // optimistic locking: a remote writer bumped the version, so our view
        // is stale and must be refetched before diffing again
        let remote_version = self
            .monitor_keeper
            .get_version(destination_id, &db_schema.name)
            .await
            .map_err(|source| SchemaError::Version {
                table: db_schema.name.clone(),
                source,
            })?;

        if remote_version != db_schema.version {
            db_schema = self
                .sql_adapter
                .get_table_schema(&db_schema.name)
                .await
                .map_err(|source| SchemaError::Get {
                    table: data_schema.name.clone(),
                    source,
                })?;
            db_schema.version = remote_version;

            diff = db_schema.diff(data_schema);
        }

        if !diff.exists() {
            return Ok(db_schema);
        }

        self.sql_adapter
            .patch_table_schema(&diff)
            .await
            .map_err(|source| SchemaError::Patch {
                table: diff.name.clone(),
                source,
            })?;

        let new_version = self
            .monitor_keeper
            .increment_version(destination_id, &diff.name)
            .await
            .map_err(|source| SchemaError::Version {
                table: diff.name.clone(),
                source,
            })?;

        for (name, column) in &diff.columns {
            db_schema.columns.insert(name.clone(), column.clone());
        }
        if !diff.pk_fields.is_empty() {
            db_schema.pk_fields = diff.pk_fields.clone();
        }
        if diff.delete_pk_fields {
            db_schema.pk_fields.clear();
        }
        db_schema.version = new_version;

        self.tables
            .write()
            .insert(db_schema.name.clone(), db_schema.clone());

        Ok(db_schema)
    }

    /// Force-fetches (or creates) the table and replaces the cache entry.
    pub async fn refresh_table_schema(
        &self,
        destination_id: &str,
        data_schema: &Table,
    ) -> Result<Table, SchemaError> {
        let db_schema = self.get_or_create(destination_id, data_schema).await?;

        self.tables
            .write()
            .insert(db_schema.name.clone(), db_schema.clone());

        Ok(db_schema)
    }

    async fn get_cached_table_schema(
        &self,
        destination_id: &str,
        data_schema: &Table,
    ) -> Result<Table, SchemaError> {
        if let Some(db_schema) = self.tables.read().get(&data_schema.name) {
            return Ok(db_schema.clone());
        }

        let db_schema = self.get_or_create(destination_id, data_schema).await?;

        self.tables
            .write()
            .insert(db_schema.name.clone(), db_schema.clone());

        Ok(db_schema)
    }

    /// Fetches the current schema under the coordination lock, creating the
    /// table and issuing its first version if it does not exist yet.
    async fn get_or_create(
        &self,
        destination_id: &str,
        data_schema: &Table,
    ) -> Result<Table, SchemaError> {
        let _lock = self
            .monitor_keeper
            .lock(destination_id, &data_schema.name)
            .await
            .map_err(|source| {
                error!(table = %data_schema.name, %source, "system error: unable to lock table");
                SchemaError::Lock {
                    table: data_schema.name.clone(),
                    source,
                }
            })?;

        let mut db_schema = self
            .sql_adapter
            .get_table_schema(&data_schema.name)
            .await
            .map_err(|source| SchemaError::Get {
                table: data_schema.name.clone(),
                source,
            })?;

        if !db_schema.exists() {
            self.sql_adapter
                .create_table(data_schema)
                .await
                .map_err(|source| SchemaError::Create {
                    table: data_schema.name.clone(),
                    source,
                })?;

            let version = self
                .monitor_keeper
                .increment_version(destination_id, &data_schema.name)
                .await
                .map_err(|source| SchemaError::Version {
                    table: data_schema.name.clone(),
                    source,
                })?;

            db_schema.name = data_schema.name.clone();
            db_schema.columns = data_schema.columns.clone();
            db_schema.pk_fields = data_schema.pk_fields.clone();
            db_schema.version = version;
        } else {
            db_schema.version = self
                .monitor_keeper
                .get_version(destination_id, &db_schema.name)
                .await
                .map_err(|source| SchemaError::Version {
                    table: db_schema.name.clone(),
                    source,
                })?;
        }

        Ok(db_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use edp_core::coordination::InProcessMonitor;
    use edp_core::event::EventContext;
    use edp_core::types::{DataType, Field};

    /// Adapter over an in-memory table map, counting DDL calls.
    #[derive(Default)]
    struct MockAdapter {
        tables: parking_lot::Mutex<HashMap<String, Table>>,
        create_calls: AtomicUsize,
        patch_calls: AtomicUsize,
        type_mapping: edp_core::adapter::TypeMapping,
    }

    impl MockAdapter {
        fn new() -> MockAdapter {
            let mut type_mapping = BTreeMap::new();
            type_mapping.insert(DataType::Int64, "bigint".to_string());
            type_mapping.insert(DataType::String, "text".to_string());
            type_mapping.insert(DataType::Bool, "boolean".to_string());
            MockAdapter {
                type_mapping,
                ..MockAdapter::default()
            }
        }

        fn put_column(&self, table_name: &str, column: &str, sql_type: &str) {
            let mut tables = self.tables.lock();
            let table = tables
                .entry(table_name.to_string())
                .or_insert_with(|| Table::new(table_name));
            table
                .columns
                .insert(column.to_string(), SqlColumn::new(sql_type));
        }
    }

    #[async_trait::async_trait]
    impl SqlAdapter for MockAdapter {
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
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.tables.lock().insert(table.name.clone(), table.clone());
            Ok(())
        }

        async fn patch_table_schema(&self, diff: &Table) -> Result<(), AdapterError> {
            self.patch_calls.fetch_add(1, Ordering::SeqCst);
            let mut tables = self.tables.lock();
            let table = tables
                .entry(diff.name.clone())
                .or_insert_with(|| Table::new(&diff.name));
            for (name, column) in &diff.columns {
                table.columns.insert(name.clone(), column.clone());
            }
            if diff.delete_pk_fields {
                table.pk_fields.clear();
            }
            if !diff.pk_fields.is_empty() {
                table.pk_fields = diff.pk_fields.clone();
            }
            Ok(())
        }

        async fn truncate(&self, _table_name: &str) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn insert(&self, _ctx: &EventContext) -> Result<(), AdapterError> {
            Ok(())
        }
    }

    fn helper(adapter: Arc<MockAdapter>, monitor: Arc<InProcessMonitor>) -> TableHelper {
        TableHelper::new(adapter, monitor, BTreeSet::new(), 0, true)
    }

    fn desired(columns: &[(&str, &str)]) -> Table {
        let mut table = Table::new("events");
        for (name, sql_type) in columns {
            table.columns.insert(name.to_string(), SqlColumn::new(*sql_type));
        }
        table
    }

    #[tokio::test]
    async fn cold_create_issues_create_and_first_version() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter.clone(), monitor);

        let table = helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint"), ("b", "text")]))
            .await
            .unwrap();

        assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.patch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(table.version, 1);
        assert_eq!(table.columns.len(), 2);
        assert!(helper.tables.read().contains_key("events"));
    }

    #[tokio::test]
    async fn repeated_ensure_with_same_schema_is_idempotent() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter.clone(), monitor.clone());

        let schema = desired(&[("a", "bigint"), ("b", "text")]);
        let first = helper
            .ensure_table_with_caching("dest", &schema)
            .await
            .unwrap();
        let second = helper
            .ensure_table_with_caching("dest", &schema)
            .await
            .unwrap();

        assert_eq!(adapter.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.patch_calls.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.get_version("dest", "events").await.unwrap(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn additive_drift_patches_once_and_bumps_version() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter.clone(), monitor);

        helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();
        let table = helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint"), ("c", "boolean")]))
            .await
            .unwrap();

        assert_eq!(adapter.patch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.version, 2);
        assert!(table.columns.contains_key("a"));
        assert!(table.columns.contains_key("c"));
        assert_eq!(helper.tables.read()["events"], table);
    }

    #[tokio::test]
    async fn version_race_refetches_and_skips_patch() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter.clone(), monitor.clone());

        helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();

        // a remote writer adds column x and bumps the version behind our back
        adapter.put_column("events", "x", "text");
        monitor.increment_version("dest", "events").await.unwrap();

        let table = helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint"), ("x", "text")]))
            .await
            .unwrap();

        assert_eq!(adapter.patch_calls.load(Ordering::SeqCst), 0);
        assert!(table.columns.contains_key("x"));
        assert_eq!(table.version, 2);
    }

    #[tokio::test]
    async fn concurrent_ensures_issue_one_patch_for_one_diff() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = Arc::new(helper(adapter.clone(), monitor));

        helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let helper = helper.clone();
            handles.push(tokio::spawn(async move {
                helper
                    .ensure_table_with_caching("dest", &desired(&[("a", "bigint"), ("b", "text")]))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let table = handle.await.unwrap();
            assert!(table.columns.contains_key("b"));
        }

        assert_eq!(adapter.patch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(helper.tables.read()["events"].columns.len(), 2);
    }

    #[tokio::test]
    async fn batch_mode_ensure_always_consults_the_warehouse() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let batch_helper =
            TableHelper::new(adapter.clone(), monitor, BTreeSet::new(), 0, false);

        batch_helper
            .ensure("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();

        // out-of-band column is visible immediately, no cache in the way
        adapter.put_column("events", "x", "text");
        let table = batch_helper
            .ensure("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();

        assert!(table.columns.contains_key("x"));
    }

    #[tokio::test]
    async fn refresh_replaces_the_cache_entry() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter.clone(), monitor);

        helper
            .ensure_table_with_caching("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();

        // out-of-band column invisible through the cache until refresh
        adapter.put_column("events", "z", "text");
        let refreshed = helper
            .refresh_table_schema("dest", &desired(&[("a", "bigint")]))
            .await
            .unwrap();

        assert!(refreshed.columns.contains_key("z"));
        assert!(helper.tables.read()["events"].columns.contains_key("z"));
    }

    #[tokio::test]
    async fn map_table_schema_prefers_suggested_sql_types() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter, monitor);

        let header = BatchHeader::new("events")
            .with_field("plain", Field::new(DataType::Int64))
            .with_field(
                "suggested",
                Field::new(DataType::String)
                    .with_suggested_sql_type("mock", SqlColumn::new("jsonb")),
            )
            .with_field("unmapped", Field::new(DataType::Timestamp));

        let table = helper.map_table_schema(&header);

        assert_eq!(table.columns["plain"], SqlColumn::new("bigint"));
        assert_eq!(table.columns["suggested"], SqlColumn::new("jsonb"));
        // no mapping for timestamps in the mock: dropped, not failed
        assert!(!table.columns.contains_key("unmapped"));
    }

    #[tokio::test]
    async fn mapping_round_trips_through_batch_header() {
        let adapter = Arc::new(MockAdapter::new());
        let monitor = Arc::new(InProcessMonitor::new());
        let helper = helper(adapter, monitor);

        let header = BatchHeader::new("events")
            .with_field("a", Field::new(DataType::Int64))
            .with_field("b", Field::new(DataType::String));

        let mapped = helper.map_table_schema(&header);
        let remapped = helper.map_table_schema(&mapped.as_batch_header("mock"));

        assert_eq!(mapped.columns, remapped.columns);
        assert_eq!(mapped.name, remapped.name);
    }
}
