//! The query plan contract.
//!
//! A [`QueryPlan`] is an immutable relational query builder. Chaining an
//! operation returns a new plan; pass-through operations hand back the
//! builder's own result types; execution is left to the caller, who
//! compiles the plan with [`QueryPlan::statement`].

use std::collections::BTreeMap;

use stratum_common::OrmResult;
use stratum_model::{ColumnType, Model, Value};

use crate::exec::{ColumnDescription, Connection};
use crate::expr::{Expr, OrderByExpr};
use crate::statement::{JoinKind, SelectStatement, Statement};

/// Operations that return a new plan.
#[derive(Debug, Clone)]
pub enum ChainOp {
    /// Adds a WHERE predicate, AND-ed with existing ones.
    Filter(Expr),
    /// Adds `attr = value` predicates against the primary entity.
    FilterBy(Vec<(String, Value)>),
    /// Appends sort keys.
    OrderBy(Vec<OrderByExpr>),
    /// Sets LIMIT.
    Limit(u64),
    /// Sets OFFSET.
    Offset(u64),
    /// Joins another model.
    Join {
        /// Joined model.
        model: Model,
        /// Join condition.
        on: Expr,
        /// Join flavor.
        kind: JoinKind,
    },
    /// Selects distinct rows.
    Distinct,
    /// Appends GROUP BY keys.
    GroupBy(Vec<Expr>),
    /// Selects additional column expressions.
    AddColumns(Vec<Expr>),
    /// Selects an additional entity.
    AddEntity(Model),
    /// Sets the result page size.
    YieldPer(usize),
}

impl ChainOp {
    /// Returns the builder method name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            ChainOp::Filter(_) => "filter",
            ChainOp::FilterBy(_) => "filter_by",
            ChainOp::OrderBy(_) => "order_by",
            ChainOp::Limit(_) => "limit",
            ChainOp::Offset(_) => "offset",
            ChainOp::Join {
                kind: JoinKind::Inner,
                ..
            } => "join",
            ChainOp::Join {
                kind: JoinKind::Left,
                ..
            } => "outerjoin",
            ChainOp::Distinct => "distinct",
            ChainOp::GroupBy(_) => "group_by",
            ChainOp::AddColumns(_) => "add_columns",
            ChainOp::AddEntity(_) => "add_entity",
            ChainOp::YieldPer(_) => "yield_per",
        }
    }
}

/// Operations whose result is returned unwrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughOp {
    /// Executes a row count.
    Count,
    /// Executes a DELETE of the matched rows.
    Delete,
    /// An EXISTS expression over the query.
    Exists,
    /// The query as a labeled scalar subquery.
    Label(String),
    /// The query as a derived table.
    Subquery(Option<String>),
    /// The compiled statement.
    Statement,
    /// The query as a common table expression.
    Cte(Option<String>),
    /// Metadata for the selected columns.
    ColumnDescriptions,
    /// The current execution options.
    ExecutionOptions,
    /// The compiled statement, for use in another query.
    Selectable,
    /// The query as a scalar subquery.
    AsScalar,
}

impl PassthroughOp {
    /// Returns the builder method name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            PassthroughOp::Count => "count",
            PassthroughOp::Delete => "delete",
            PassthroughOp::Exists => "exists",
            PassthroughOp::Label(_) => "label",
            PassthroughOp::Subquery(_) => "subquery",
            PassthroughOp::Statement => "statement",
            PassthroughOp::Cte(_) => "cte",
            PassthroughOp::ColumnDescriptions => "column_descriptions",
            PassthroughOp::ExecutionOptions => "execution_options",
            PassthroughOp::Selectable => "selectable",
            PassthroughOp::AsScalar => "as_scalar",
        }
    }
}

/// Results of pass-through operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutput {
    /// Number of matching rows.
    Count(u64),
    /// Number of deleted rows.
    Deleted(u64),
    /// An expression built from the query.
    Expr(Expr),
    /// A compiled statement.
    Statement(Statement),
    /// A derived table.
    Subquery {
        /// Alias.
        alias: String,
        /// Query.
        query: SelectStatement,
    },
    /// A common table expression.
    Cte {
        /// Name.
        name: String,
        /// Query.
        query: SelectStatement,
    },
    /// Selected column metadata.
    ColumnDescriptions(Vec<ColumnDescription>),
    /// Execution options.
    ExecutionOptions(BTreeMap<String, String>),
}

/// One selected item and the labels its values are read from.
#[derive(Debug, Clone)]
pub enum Selection {
    /// A whole model.
    Entity {
        /// The model.
        model: Model,
        /// Result label per model column, in column order.
        labels: Vec<String>,
    },
    /// A single column expression.
    Column {
        /// The expression.
        expr: Expr,
        /// Result label.
        label: String,
    },
}

impl Selection {
    /// Returns the label this item is known by in a result tuple.
    pub fn name(&self) -> &str {
        match self {
            Selection::Entity { model, .. } => model.name(),
            Selection::Column { label, .. } => label,
        }
    }

    /// Describes the result columns of this item.
    pub fn describe(&self) -> Vec<ColumnDescription> {
        match self {
            Selection::Entity { model, labels } => model
                .columns()
                .iter()
                .zip(labels)
                .map(|(column, label)| ColumnDescription {
                    name: label.clone(),
                    field_type: Some(column.ty().field_type().to_string()),
                    entity: Some(model.name().to_string()),
                })
                .collect(),
            Selection::Column { expr, label } => vec![ColumnDescription {
                name: label.clone(),
                field_type: expr
                    .data_type()
                    .as_ref()
                    .map(ColumnType::field_type)
                    .map(str::to_string),
                entity: None,
            }],
        }
    }
}

/// In-memory session synchronization after a bulk UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynchronizeSession {
    /// Leave loaded objects untouched.
    #[default]
    Disabled,
    /// Apply the assignments to matching loaded objects.
    Evaluate,
    /// Re-select matching keys before updating.
    Fetch,
}

/// A relational query builder.
pub trait QueryPlan: Clone {
    /// Returns a new plan with `op` applied.
    fn apply(&self, op: ChainOp) -> OrmResult<Self>;

    /// Runs an operation whose result is returned as-is.
    fn passthrough(&self, op: PassthroughOp, conn: &mut dyn Connection) -> OrmResult<PlanOutput>;

    /// Executes an UPDATE of the matched rows and returns the affected count.
    fn update(
        &self,
        assignments: &[(&str, Value)],
        synchronize: SynchronizeSession,
        conn: &mut dyn Connection,
    ) -> OrmResult<u64>;

    /// Compiles the plan to a SELECT.
    fn statement(&self) -> OrmResult<SelectStatement>;

    /// Returns the selected items with their result labels.
    fn selections(&self) -> Vec<Selection>;

    /// Returns the requested result page size.
    fn yield_per(&self) -> Option<usize>;
}
