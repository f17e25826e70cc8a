//! SQL adapter contract: the dialect-specific boundary.
//!
//! Concrete warehouse adapters (Postgres, ClickHouse, BigQuery, ...) live
//! outside the core and implement [`SqlAdapter`]. The write path only needs
//! schema introspection, DDL application, row insertion, and an error
//! partition it can test with [`AdapterError::is_connection_error`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::EventContext;
use crate::table::Table;
use crate::types::DataType;

/// Mapping from semantic types to dialect SQL type literals.
pub type TypeMapping = BTreeMap<DataType, String>;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Transient network/driver failure. The event stays on the queue and is
    /// redelivered instead of being dead-lettered.
    #[error("connection error: {0}")]
    Connection(String),
    /// Any other adapter failure; treated as a data error.
    #[error("{0}")]
    Data(String),
}

impl AdapterError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, AdapterError::Connection(_))
    }
}

/// One column of one row, as shown by a dry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableField {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub field: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty", default)]
    pub sql_type: String,
    pub value: Value,
}

/// Dialect-specific warehouse operations.
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    /// Stable identifier of the dialect, e.g. `postgres`.
    fn destination_type(&self) -> &str;

    /// `DataType -> SQL type literal` table used when mapping stream schemas.
    fn type_mapping(&self) -> &TypeMapping;

    /// Returns the current table schema. A table that is absent from the
    /// warehouse comes back as a [`Table`] with `exists() == false`, not as
    /// an error.
    async fn get_table_schema(&self, table_name: &str) -> Result<Table, AdapterError>;

    async fn create_table(&self, table: &Table) -> Result<(), AdapterError>;

    /// Applies a schema delta: ADD COLUMN for each diff column, PK creation
    /// when the diff carries PK fields, PK drop when the deletion marker is
    /// set.
    async fn patch_table_schema(&self, diff: &Table) -> Result<(), AdapterError>;

    /// Removes all rows from the table. Used by full-refresh syncs before
    /// the first batch of a run.
    async fn truncate(&self, table_name: &str) -> Result<(), AdapterError>;

    async fn insert(&self, ctx: &EventContext) -> Result<(), AdapterError>;
}
