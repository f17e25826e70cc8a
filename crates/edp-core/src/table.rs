//! Warehouse table schema model and forward-only diffing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{BatchHeader, DataType, Field};

/// A SQL column carrying its dialect-specific type literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlColumn {
    pub sql_type: String,
}

impl SqlColumn {
    pub fn new(sql_type: impl Into<String>) -> SqlColumn {
        SqlColumn {
            sql_type: sql_type.into(),
        }
    }
}

/// Columns of a table keyed by column name. Order is irrelevant
/// semantically; the map is ordered for deterministic SQL generation.
pub type Columns = BTreeMap<String, SqlColumn>;

/// A warehouse table schema.
///
/// `version` is issued by the coordination service and increases on every
/// successful schema mutation. A locally cached version lower than the
/// coordination service's means the cached schema is stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Columns,
    pub pk_fields: BTreeSet<String>,
    /// Only ever set by [`Table::diff`] to mark "drop the current PK
    /// constraint" before an optional re-create.
    pub delete_pk_fields: bool,
    pub version: i64,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Table {
        Table {
            name: name.into(),
            ..Table::default()
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column: SqlColumn) -> Table {
        self.columns.insert(name.into(), column);
        self
    }

    pub fn with_pk_field(mut self, name: impl Into<String>) -> Table {
        self.pk_fields.insert(name.into());
        self
    }

    /// A table exists if it carries at least one column, at least one PK
    /// field, or the PK deletion marker.
    pub fn exists(&self) -> bool {
        !self.columns.is_empty() || !self.pk_fields.is_empty() || self.delete_pk_fields
    }

    pub fn pk_fields(&self) -> impl Iterator<Item = &str> {
        self.pk_fields.iter().map(String::as_str)
    }

    /// Calculates what must be added to `self` so it covers `desired`.
    ///
    /// The returned table contains only columns present in `desired` but
    /// absent (by name) from `self`. Types of already-existing columns are
    /// never compared: once a column exists its declared type is
    /// authoritative, so source-side type widening can never trigger a
    /// destructive migration.
    ///
    /// Primary keys: equal sets (including both empty) produce no PK change;
    /// a desired PK where none exists produces a create; an empty desired PK
    /// where one exists produces the deletion marker; unequal non-empty sets
    /// produce the deletion marker plus the new set (re-create).
    pub fn diff(&self, desired: &Table) -> Table {
        let mut diff = Table::new(&self.name);

        if !desired.exists() {
            return diff;
        }

        for (name, column) in &desired.columns {
            if !self.columns.contains_key(name) {
                diff.columns.insert(name.clone(), column.clone());
            }
        }

        if !self.pk_fields.is_empty() && desired.pk_fields.is_empty() {
            diff.delete_pk_fields = true;
        } else if self.pk_fields.is_empty() && !desired.pk_fields.is_empty() {
            diff.pk_fields = desired.pk_fields.clone();
        } else if self.pk_fields != desired.pk_fields {
            diff.delete_pk_fields = true;
            diff.pk_fields = desired.pk_fields.clone();
        }

        diff
    }

    /// Projects the table back into a stream schema, carrying each column's
    /// SQL type as the suggestion for `destination_type`. Mapping the result
    /// again reproduces this table's columns.
    pub fn as_batch_header(&self, destination_type: &str) -> BatchHeader {
        let mut header = BatchHeader::new(&self.name);
        for (name, column) in &self.columns {
            header.fields.insert(
                name.clone(),
                Field::new(DataType::Unknown)
                    .with_suggested_sql_type(destination_type, column.clone()),
            );
        }
        header
    }
}
