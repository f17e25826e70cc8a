//! Stdout destination adapter for development and debugging.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use edp_core::adapter::{AdapterError, SqlAdapter, TypeMapping};
use edp_core::event::EventContext;
use edp_core::table::Table;
use edp_core::types::DataType;

/// Keeps table schemas in memory and prints every insert. Lets a pipeline
/// be exercised end to end without a warehouse.
pub struct StdoutAdapter {
    tables: Mutex<HashMap<String, Table>>,
    type_mapping: TypeMapping,
}

impl StdoutAdapter {
    pub fn new() -> StdoutAdapter {
        let mut type_mapping = TypeMapping::new();
        type_mapping.insert(DataType::Bool, "boolean".to_string());
        type_mapping.insert(DataType::Int64, "bigint".to_string());
        type_mapping.insert(DataType::Float64, "double precision".to_string());
        type_mapping.insert(DataType::String, "text".to_string());
        type_mapping.insert(DataType::Timestamp, "timestamp".to_string());

        StdoutAdapter {
            tables: Mutex::new(HashMap::new()),
            type_mapping,
        }
    }
}

impl Default for StdoutAdapter {
    fn default() -> StdoutAdapter {
        StdoutAdapter::new()
    }
}

#[async_trait]
impl SqlAdapter for StdoutAdapter {
    fn destination_type(&self) -> &str {
        "stdout"
    }

    fn type_mapping(&self) -> &TypeMapping {
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
        info!(table = %table.name, columns = table.columns.len(), "create table");
        self.tables.lock().insert(table.name.clone(), table.clone());
        Ok(())
    }

    async fn patch_table_schema(&self, diff: &Table) -> Result<(), AdapterError> {
        info!(table = %diff.name, added_columns = diff.columns.len(), "patch table schema");
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

    async fn truncate(&self, table_name: &str) -> Result<(), AdapterError> {
        info!(table = %table_name, "truncate table");
        Ok(())
    }

    async fn insert(&self, ctx: &EventContext) -> Result<(), AdapterError> {
        let row = serde_json::to_string(&ctx.processed_event)
            .map_err(|err| AdapterError::Data(err.to_string()))?;
        println!("[{}] {row}", ctx.table.name);
        Ok(())
    }
}
