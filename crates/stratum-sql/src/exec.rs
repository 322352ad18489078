//! Execution contracts.
//!
//! The query builder never talks to the warehouse itself. It hands compiled
//! statements to a [`Connection`] and reads results from the [`Cursor`] it
//! returns.

use stratum_common::OrmResult;
use stratum_model::Value;

use crate::statement::Statement;

/// A result row, one value per result column.
pub type Row = Vec<Value>;

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    /// Result label.
    pub name: String,
    /// Warehouse field type, when known.
    pub field_type: Option<String>,
    /// Model name of the entity the column belongs to, if any.
    pub entity: Option<String>,
}

impl ColumnDescription {
    /// Describes a column by label only.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: None,
            entity: None,
        }
    }
}

/// An open result set.
pub trait Cursor {
    /// Describes the result columns.
    fn description(&self) -> &[ColumnDescription];

    /// Fetches up to `size` rows. An empty page means the result is exhausted.
    fn fetch_many(&mut self, size: usize) -> OrmResult<Vec<Row>>;

    /// Fetches every remaining row.
    fn fetch_all(&mut self) -> OrmResult<Vec<Row>>;

    /// Releases the result set. Closing twice is a no-op.
    fn close(&mut self);

    /// Returns true once the cursor is closed.
    fn is_closed(&self) -> bool;
}

/// A connection able to run compiled statements.
pub trait Connection {
    /// Runs a query and returns its cursor.
    fn execute(&mut self, statement: &Statement) -> OrmResult<Box<dyn Cursor>>;

    /// Runs an UPDATE or DELETE and returns the affected row count.
    fn execute_update(&mut self, statement: &Statement) -> OrmResult<u64>;

    /// Rolls back the active unit of work.
    fn rollback(&mut self) -> OrmResult<()>;

    /// Releases the connection.
    fn close(&mut self) -> OrmResult<()>;
}
