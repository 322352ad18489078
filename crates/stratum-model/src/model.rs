//! Model definitions.
//!
//! A [`Model`] describes one warehouse table: its identifier, its ordered
//! columns and its partition/cluster layout. Models are cheap to clone and
//! are shared by every instance and query built from them.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use stratum_common::{OrmError, OrmResult, MAX_CLUSTER_FIELDS, PARTITION_FIELDS};

use crate::column::{Column, ColumnType};
use crate::instance::Instance;
use crate::schema::{FieldSchema, Partitioning, TableSchema};

/// Callback run on every instance loaded from the warehouse.
pub type LoadHook = Arc<dyn Fn(&mut Instance) + Send + Sync>;

struct ModelInner {
    name: String,
    table: String,
    columns: Vec<Column>,
    partitioning: Option<Partitioning>,
    clustering: Vec<String>,
    load_hooks: Vec<LoadHook>,
}

/// A table mapping.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Starts building a model named `name` for table `table`.
    ///
    /// `table` is either `table` or `dataset.table`.
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> ModelBuilder {
        ModelBuilder {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            partition_by: None,
            cluster_by: None,
            load_hooks: Vec::new(),
        }
    }

    /// Returns the model name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the table identifier as declared.
    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Returns the columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.inner.columns
    }

    /// Looks up a column by attribute name.
    pub fn column(&self, attr: &str) -> Option<&Column> {
        self.inner.columns.iter().find(|c| c.attr() == attr)
    }

    /// Looks up a column by attribute name, then by wire name.
    pub fn resolve_column(&self, key: &str) -> Option<&Column> {
        self.column(key)
            .or_else(|| self.inner.columns.iter().find(|c| c.field_name() == key))
    }

    /// Returns the partitioning, if any.
    pub fn partitioning(&self) -> Option<&Partitioning> {
        self.inner.partitioning.as_ref()
    }

    /// Returns the clustering fields.
    pub fn clustering(&self) -> &[String] {
        &self.inner.clustering
    }

    /// Returns the registered load hooks.
    pub fn load_hooks(&self) -> &[LoadHook] {
        &self.inner.load_hooks
    }

    /// Returns the table schema derived from the columns.
    pub fn table_schema(&self) -> TableSchema {
        TableSchema {
            fields: self
                .inner
                .columns
                .iter()
                .map(|c| FieldSchema::new(c.field_name(), c.ty().field_type(), c.mode()))
                .collect(),
            partitioning: self.inner.partitioning.clone(),
            clustering: self.inner.clustering.clone(),
        }
    }

    /// Renders `CREATE TABLE` text for the fully qualified `table_id`.
    pub fn create_table_ddl(&self, table_id: &str) -> String {
        let columns: Vec<String> = self
            .inner
            .columns
            .iter()
            .map(|c| {
                let not_null = if c.is_nullable() { "" } else { " NOT NULL" };
                format!("\t`{}` {}{}", c.field_name(), c.ty().sql_type(), not_null)
            })
            .collect();

        let mut ddl = format!("CREATE TABLE `{}` (\n{}\n)", table_id, columns.join(",\n"));

        match &self.inner.partitioning {
            Some(Partitioning::IngestionTime) => {
                ddl.push_str("\nPARTITION BY DATE(_PARTITIONTIME)");
            }
            Some(Partitioning::Column(name)) => {
                let is_date = self
                    .inner
                    .columns
                    .iter()
                    .any(|c| c.field_name() == name && *c.ty() == ColumnType::Date);
                if is_date {
                    ddl.push_str(&format!("\nPARTITION BY `{}`", name));
                } else {
                    ddl.push_str(&format!("\nPARTITION BY DATE(`{}`)", name));
                }
            }
            None => {}
        }

        if !self.inner.clustering.is_empty() {
            let fields: Vec<String> = self
                .inner
                .clustering
                .iter()
                .map(|f| format!("`{}`", f))
                .collect();
            ddl.push_str(&format!("\nCLUSTER BY {}", fields.join(", ")));
        }
        ddl
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.name == other.inner.name && self.inner.table == other.inner.table)
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.inner.name)
            .field("table", &self.inner.table)
            .field("columns", &self.inner.columns)
            .field("partitioning", &self.inner.partitioning)
            .field("clustering", &self.inner.clustering)
            .finish()
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    name: String,
    table: String,
    columns: Vec<Column>,
    partition_by: Option<Vec<String>>,
    cluster_by: Option<Vec<String>>,
    load_hooks: Vec<LoadHook>,
}

impl ModelBuilder {
    /// Adds a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the partition spec. Exactly one timestamp or date field.
    pub fn partition_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_by = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the cluster spec. Between one and four fields.
    pub fn cluster_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster_by = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Registers a callback run on every loaded instance.
    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Instance) + Send + Sync + 'static,
    {
        self.load_hooks.push(Arc::new(hook));
        self
    }

    /// Validates the declaration and builds the model.
    pub fn build(self) -> OrmResult<Model> {
        if self.table.is_empty() {
            return Err(OrmError::validation(format!(
                "model {} has no table name",
                self.name
            )));
        }
        if self.columns.is_empty() {
            return Err(OrmError::validation(format!(
                "model {} declares no columns",
                self.name
            )));
        }

        let mut attrs = HashSet::new();
        let mut fields = HashSet::new();
        for column in &self.columns {
            column.validate()?;
            if !attrs.insert(column.attr()) || !fields.insert(column.field_name()) {
                return Err(OrmError::validation(format!(
                    "model {} declares column '{}' twice",
                    self.name,
                    column.attr()
                )));
            }
        }

        let partitioning = match (&self.partition_by, &self.cluster_by) {
            (Some(spec), _) => {
                if spec.len() != PARTITION_FIELDS {
                    return Err(OrmError::validation(format!(
                        "partition_by must name exactly {} field, got {}",
                        PARTITION_FIELDS,
                        spec.len()
                    )));
                }
                let name = &spec[0];
                let column = self
                    .columns
                    .iter()
                    .find(|c| c.field_name() == name)
                    .ok_or_else(|| {
                        OrmError::validation(format!(
                            "column {} not found for table partition",
                            name
                        ))
                    })?;
                match column.ty() {
                    ColumnType::Timestamp | ColumnType::Date => {
                        Some(Partitioning::Column(name.clone()))
                    }
                    other => {
                        return Err(OrmError::validation(format!(
                            "cannot partition by {} column {}",
                            other, name
                        )))
                    }
                }
            }
            (None, Some(_)) => Some(Partitioning::IngestionTime),
            (None, None) => None,
        };

        let clustering = match self.cluster_by {
            Some(spec) => {
                if spec.is_empty() || spec.len() > MAX_CLUSTER_FIELDS {
                    return Err(OrmError::validation(format!(
                        "cluster_by must name between 1 and {} fields, got {}",
                        MAX_CLUSTER_FIELDS,
                        spec.len()
                    )));
                }
                if let Some(unknown) = spec.iter().find(|f| !fields.contains(f.as_str())) {
                    return Err(OrmError::validation(format!(
                        "column {} not found for table clustering",
                        unknown
                    )));
                }
                spec
            }
            None => Vec::new(),
        };

        Ok(Model {
            inner: Arc::new(ModelInner {
                name: self.name,
                table: self.table,
                columns: self.columns,
                partitioning,
                clustering,
                load_hooks: self.load_hooks,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ModelBuilder {
        Model::builder("Event", "analytics.event")
            .column(Column::new("id", ColumnType::Integer).required().default(0))
            .column(Column::new("at", ColumnType::Timestamp))
            .column(Column::new("day", ColumnType::Date))
            .column(Column::new("kind", ColumnType::String { max_length: None }))
    }

    #[test]
    fn test_build_and_lookup() {
        let model = base().build().unwrap();
        assert_eq!(model.name(), "Event");
        assert_eq!(model.columns().len(), 4);
        assert!(model.column("at").is_some());
        assert!(model.partitioning().is_none());
        assert_eq!(model.table_schema().fields[0], FieldSchema::new("id", "INTEGER", "REQUIRED"));
    }

    #[test]
    fn test_partition_and_cluster_validation() {
        assert!(base().partition_by(["at", "day"]).build().is_err());
        assert!(base().partition_by(Vec::<String>::new()).build().is_err());
        assert!(base().partition_by(["kind"]).build().is_err());
        assert!(base().partition_by(["missing"]).build().is_err());
        assert!(base().cluster_by(Vec::<String>::new()).build().is_err());
        assert!(base()
            .cluster_by(["id", "at", "day", "kind", "id"])
            .build()
            .is_err());
        assert!(base().cluster_by(["nope"]).build().is_err());

        let model = base().cluster_by(["kind"]).build().unwrap();
        assert_eq!(model.partitioning(), Some(&Partitioning::IngestionTime));
    }

    #[test]
    fn test_duplicate_and_reserved_columns() {
        assert!(base()
            .column(Column::new("id", ColumnType::Integer))
            .build()
            .is_err());
        assert!(base()
            .column(Column::new("_PARTITIONTIME", ColumnType::Timestamp))
            .build()
            .is_err());
        assert!(Model::builder("Empty", "t").build().is_err());
    }

    #[test]
    fn test_ddl_partition_clauses() {
        let ddl = base()
            .cluster_by(["kind"])
            .build()
            .unwrap()
            .create_table_ddl("analytics.event");
        assert!(ddl.starts_with("CREATE TABLE `analytics.event` (\n\t`id` INT64 NOT NULL,"));
        assert!(ddl.contains("PARTITION BY DATE(_PARTITIONTIME)"));
        assert!(ddl.ends_with("CLUSTER BY `kind`"));

        let ddl = base().partition_by(["at"]).build().unwrap().create_table_ddl("d.t");
        assert!(ddl.contains("PARTITION BY DATE(`at`)"));

        let ddl = base().partition_by(["day"]).build().unwrap().create_table_ddl("d.t");
        assert!(ddl.contains("PARTITION BY `day`"));
        assert!(!ddl.contains("CLUSTER BY"));
    }
}
