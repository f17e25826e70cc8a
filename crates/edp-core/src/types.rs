//! Semantic data types and pre-SQL stream schemas.
//!
//! A [`BatchHeader`] describes a stream's logical schema before any SQL
//! mapping happens: a table name plus per-field [`DataType`]s. Destinations
//! map these into concrete SQL column types through their own
//! `DataType -> SQL type` tables, unless a field carries a
//! destination-specific suggested SQL type that wins over the mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::table::SqlColumn;

/// Semantic type of a field value, independent of any SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Unknown,
    Bool,
    Int64,
    Float64,
    String,
    Timestamp,
}

impl DataType {
    /// Infers the semantic type of a JSON value. Objects and arrays map to
    /// [`DataType::Unknown`] since they are flattened or serialised before
    /// they reach a destination.
    pub fn from_value(value: &Value) -> DataType {
        match value {
            Value::Bool(_) => DataType::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    DataType::Int64
                } else {
                    DataType::Float64
                }
            }
            Value::String(_) => DataType::String,
            _ => DataType::Unknown,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::Unknown => "unknown",
            DataType::Bool => "bool",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::String => "string",
            DataType::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

/// One field of a stream schema: its semantic type plus optional
/// destination-specific SQL type overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    data_type: DataType,
    /// Per-destination-type suggested SQL column, e.g. a connector declaring
    /// that a field must land as `TIMESTAMPTZ` on `postgres`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    suggested_sql_types: BTreeMap<String, SqlColumn>,
}

impl Field {
    pub fn new(data_type: DataType) -> Field {
        Field {
            data_type,
            suggested_sql_types: BTreeMap::new(),
        }
    }

    pub fn with_suggested_sql_type(mut self, destination_type: &str, column: SqlColumn) -> Field {
        self.suggested_sql_types
            .insert(destination_type.to_string(), column);
        self
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the suggested SQL column for the given destination type, if
    /// the source declared one. A suggestion always wins over the
    /// destination's own type mapping.
    pub fn suggested_sql_type(&self, destination_type: &str) -> Option<&SqlColumn> {
        self.suggested_sql_types.get(destination_type)
    }
}

/// Named fields of one stream.
pub type Fields = BTreeMap<String, Field>;

/// A stream's logical schema: target table name plus typed fields.
/// This is what the table helper maps into a SQL [`crate::table::Table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub table_name: String,
    pub fields: Fields,
}

impl BatchHeader {
    pub fn new(table_name: impl Into<String>) -> BatchHeader {
        BatchHeader {
            table_name: table_name.into(),
            fields: Fields::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: Field) -> BatchHeader {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn exists(&self) -> bool {
        !self.fields.is_empty()
    }
}
