//! Table schemas as the warehouse describes them.

use serde::{Deserialize, Serialize};

/// One field of a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field type, e.g. `INTEGER` or `GEOGRAPHY`.
    pub field_type: String,
    /// `NULLABLE` or `REQUIRED`.
    pub mode: String,
}

impl FieldSchema {
    /// Creates a new field.
    pub fn new(
        name: impl Into<String>,
        field_type: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: mode.into(),
        }
    }

    /// Returns true if the field accepts NULL.
    pub fn is_nullable(&self) -> bool {
        self.mode != "REQUIRED"
    }
}

/// Time partitioning of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partitioning {
    /// Partitioned by ingestion time.
    IngestionTime,
    /// Partitioned by a timestamp or date column.
    Column(String),
}

/// A table definition: fields plus layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Fields in declaration order.
    pub fields: Vec<FieldSchema>,
    /// Time partitioning, if any.
    pub partitioning: Option<Partitioning>,
    /// Clustering fields, possibly empty.
    pub clustering: Vec<String>,
}

impl TableSchema {
    /// Creates an unpartitioned schema.
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self {
            fields,
            partitioning: None,
            clustering: Vec::new(),
        }
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|f| f.name.as_str())
    }
}
