//! The query facade.
//!
//! [`QueryFacade`] wraps a [`QueryPlan`] and decides, per operation, how it
//! runs against the warehouse. Names are classified in a fixed order:
//!
//! 1. the facade's own methods (`all`, `first`, `update`, ...)
//! 2. safe pass-through operations, whose result is returned unwrapped
//! 3. unsupported operations, rejected without touching the plan
//! 4. everything else chains, and the new plan is wrapped in a new facade
//!
//! Results never go through a deduplicating identity map: the facade
//! compiles the plan and executes the statement on the session connection,
//! so duplicate rows are preserved.

mod materialize;

use std::fmt;

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use stratum_common::{OrmError, OrmResult};
use stratum_model::{
    dicts_to_geojson, serialize, wire_row_to_json, Frame, Instance, Model, Value,
};
use stratum_sql::{
    ChainOp, Expr, JoinKind, OrderByExpr, PassthroughOp, PlanOutput, QueryPlan, SelectQuery,
    Selection, Statement, SynchronizeSession,
};

use crate::session::Session;

pub use materialize::{LabeledTuple, ResultRow, ResultValue, Rows};

// =============================================================================
// Capabilities
// =============================================================================

/// Methods the facade implements itself.
pub const FACADE_METHODS: &[&str] = &[
    "all",
    "first",
    "one",
    "one_or_none",
    "scalar",
    "update",
    "all_as_dicts",
    "all_as_geojson",
    "all_as_frame",
    "query_raw",
    "index",
];

/// Operations whose plan result is returned unwrapped.
pub const SAFE_PASSTHROUGH: &[&str] = &[
    "count",
    "delete",
    "exists",
    "label",
    "subquery",
    "statement",
    "cte",
    "column_descriptions",
    "execution_options",
    "selectable",
    "as_scalar",
];

/// Operations with no safe warehouse equivalent.
pub const UNSUPPORTED: &[&str] = &[
    "from_statement",
    "get",
    "merge_result",
    "populate_existing",
    "values",
    "value",
    "with_parent",
    "with_session",
];

/// How the facade handles an operation name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Implemented by the facade.
    Facade,
    /// Forwarded; the plan's result is returned as is.
    SafePassthrough,
    /// Rejected.
    Unsupported,
    /// Forwarded; the new plan is wrapped in a new facade.
    Chainable,
}

impl Capability {
    /// Classifies an operation name.
    pub fn classify(name: &str) -> Capability {
        if FACADE_METHODS.contains(&name) {
            Capability::Facade
        } else if SAFE_PASSTHROUGH.contains(&name) {
            Capability::SafePassthrough
        } else if UNSUPPORTED.contains(&name) {
            Capability::Unsupported
        } else {
            Capability::Chainable
        }
    }
}

/// Operations the warehouse cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedOp {
    /// Load entities from a textual statement.
    FromStatement,
    /// Look up an entity by primary key.
    Get,
    /// Merge results into a session.
    MergeResult,
    /// Overwrite loaded objects.
    PopulateExisting,
    /// Select column values directly.
    Values,
    /// Select one column value directly.
    Value,
    /// Filter by a parent relationship.
    WithParent,
    /// Rebind to another session.
    WithSession,
}

impl UnsupportedOp {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            UnsupportedOp::FromStatement => "from_statement",
            UnsupportedOp::Get => "get",
            UnsupportedOp::MergeResult => "merge_result",
            UnsupportedOp::PopulateExisting => "populate_existing",
            UnsupportedOp::Values => "values",
            UnsupportedOp::Value => "value",
            UnsupportedOp::WithParent => "with_parent",
            UnsupportedOp::WithSession => "with_session",
        }
    }
}

/// An operation forwarded to the wrapped plan.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Returns a new plan.
    Chain(ChainOp),
    /// Returns the plan's own result.
    Passthrough(PassthroughOp),
    /// Always fails.
    Unsupported(UnsupportedOp),
}

impl Operation {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Chain(op) => op.name(),
            Operation::Passthrough(op) => op.name(),
            Operation::Unsupported(op) => op.name(),
        }
    }
}

/// Result of [`QueryFacade::invoke`].
pub enum Invoked<'s, P: QueryPlan> {
    /// A chained facade.
    Query(QueryFacade<'s, P>),
    /// An unwrapped plan result.
    Output(PlanOutput),
}

// =============================================================================
// Facade
// =============================================================================

/// A warehouse-aware wrapper around a query plan.
#[derive(Clone)]
pub struct QueryFacade<'s, P: QueryPlan = SelectQuery> {
    session: &'s Session,
    plan: P,
}

impl<'s, P: QueryPlan> QueryFacade<'s, P> {
    /// Wraps `plan` for execution on `session`.
    pub fn new(session: &'s Session, plan: P) -> Self {
        Self { session, plan }
    }

    /// Returns the wrapped plan.
    pub fn plan(&self) -> &P {
        &self.plan
    }

    /// Returns the session.
    pub fn session(&self) -> &'s Session {
        self.session
    }

    /// Dispatches an operation by capability.
    pub fn invoke(&self, op: Operation) -> OrmResult<Invoked<'s, P>> {
        match op {
            Operation::Unsupported(op) => Err(OrmError::unsupported(op.name())),
            Operation::Passthrough(op) => self.passthrough(op).map(Invoked::Output),
            Operation::Chain(op) => self.chain(op).map(Invoked::Query),
        }
    }

    /// Applies a chainable operation and wraps the new plan.
    pub fn chain(&self, op: ChainOp) -> OrmResult<Self> {
        Ok(Self::new(self.session, self.plan.apply(op)?))
    }

    /// Runs a pass-through operation.
    pub fn passthrough(&self, op: PassthroughOp) -> OrmResult<PlanOutput> {
        self.session.ensure_active()?;
        self.session
            .with_connection(|conn| self.plan.passthrough(op, conn))
    }

    // -------------------------------------------------------------------------
    // Chainable shorthands
    // -------------------------------------------------------------------------

    /// Adds a WHERE predicate.
    pub fn filter(&self, predicate: Expr) -> OrmResult<Self> {
        self.chain(ChainOp::Filter(predicate))
    }

    /// Adds `attr = value` predicates on the primary entity.
    pub fn filter_by(&self, pairs: &[(&str, Value)]) -> OrmResult<Self> {
        self.chain(ChainOp::FilterBy(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ))
    }

    /// Appends sort keys.
    pub fn order_by<I, K>(&self, keys: I) -> OrmResult<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<OrderByExpr>,
    {
        self.chain(ChainOp::OrderBy(keys.into_iter().map(Into::into).collect()))
    }

    /// Sets LIMIT.
    pub fn limit(&self, n: u64) -> OrmResult<Self> {
        self.chain(ChainOp::Limit(n))
    }

    /// Sets OFFSET.
    pub fn offset(&self, n: u64) -> OrmResult<Self> {
        self.chain(ChainOp::Offset(n))
    }

    /// Inner-joins a model.
    pub fn join(&self, model: &Model, on: Expr) -> OrmResult<Self> {
        self.chain(ChainOp::Join {
            model: model.clone(),
            on,
            kind: JoinKind::Inner,
        })
    }

    /// Left-outer-joins a model.
    pub fn outerjoin(&self, model: &Model, on: Expr) -> OrmResult<Self> {
        self.chain(ChainOp::Join {
            model: model.clone(),
            on,
            kind: JoinKind::Left,
        })
    }

    /// Selects distinct rows.
    pub fn distinct(&self) -> OrmResult<Self> {
        self.chain(ChainOp::Distinct)
    }

    /// Appends GROUP BY keys.
    pub fn group_by(&self, keys: Vec<Expr>) -> OrmResult<Self> {
        self.chain(ChainOp::GroupBy(keys))
    }

    /// Selects additional column expressions.
    pub fn add_columns(&self, exprs: Vec<Expr>) -> OrmResult<Self> {
        self.chain(ChainOp::AddColumns(exprs))
    }

    /// Selects an additional entity.
    pub fn add_entity(&self, model: &Model) -> OrmResult<Self> {
        self.chain(ChainOp::AddEntity(model.clone()))
    }

    /// Sets the number of rows fetched per cursor page.
    pub fn yield_per(&self, n: usize) -> OrmResult<Self> {
        self.chain(ChainOp::YieldPer(n))
    }

    // -------------------------------------------------------------------------
    // Pass-through shorthands
    // -------------------------------------------------------------------------

    /// Counts the matching rows.
    pub fn count(&self) -> OrmResult<u64> {
        match self.passthrough(PassthroughOp::Count)? {
            PlanOutput::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    /// Deletes the matching rows and returns how many were deleted.
    pub fn delete(&self) -> OrmResult<u64> {
        match self.passthrough(PassthroughOp::Delete)? {
            PlanOutput::Deleted(n) => Ok(n),
            other => Err(unexpected("delete", &other)),
        }
    }

    /// Returns the compiled statement.
    pub fn statement(&self) -> OrmResult<Statement> {
        match self.passthrough(PassthroughOp::Statement)? {
            PlanOutput::Statement(s) => Ok(s),
            other => Err(unexpected("statement", &other)),
        }
    }

    /// Rejects an unsupported operation.
    pub fn unsupported(&self, op: UnsupportedOp) -> OrmResult<Invoked<'s, P>> {
        self.invoke(Operation::Unsupported(op))
    }

    // -------------------------------------------------------------------------
    // Facade methods
    // -------------------------------------------------------------------------

    /// Executes the query and returns its rows lazily.
    pub fn iter(&self) -> OrmResult<Rows> {
        self.session.ensure_active()?;
        let statement = Statement::Select(self.plan.statement()?);
        debug!(sql = %statement, "executing query");
        let cursor = self.session.with_connection(|conn| conn.execute(&statement))?;
        Rows::new(cursor, &self.plan.selections(), self.page_size())
    }

    /// Executes the query and returns every row, duplicates included.
    pub fn all(&self) -> OrmResult<Vec<ResultRow>> {
        self.iter()?.collect()
    }

    /// Returns the first row, if any.
    pub fn first(&self) -> OrmResult<Option<ResultRow>> {
        self.chain(ChainOp::Limit(1))?.iter()?.next().transpose()
    }

    /// Returns the only row, or `None` when there is none.
    ///
    /// Fails with [`OrmError::MultipleResults`] if more than one row matches.
    pub fn one_or_none(&self) -> OrmResult<Option<ResultRow>> {
        let mut rows = self.chain(ChainOp::Limit(2))?.all()?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            _ => Err(OrmError::MultipleResults),
        }
    }

    /// Returns the only row.
    ///
    /// Fails with [`OrmError::NoResult`] if no row matches.
    pub fn one(&self) -> OrmResult<ResultRow> {
        self.one_or_none()?.ok_or(OrmError::NoResult)
    }

    /// Returns the first item of the only row.
    pub fn scalar(&self) -> OrmResult<Option<ResultValue>> {
        Ok(self.one_or_none()?.and_then(|row| match row {
            ResultRow::Instance(instance) => Some(ResultValue::Instance(instance)),
            ResultRow::Tuple(tuple) => tuple.into_values().into_iter().next(),
        }))
    }

    /// Updates the matching rows and returns the affected count.
    ///
    /// There is no identity map to keep in sync, so session synchronization
    /// is always disabled.
    pub fn update(&self, assignments: &[(&str, Value)]) -> OrmResult<u64> {
        self.session.ensure_active()?;
        self.session.with_connection(|conn| {
            self.plan
                .update(assignments, SynchronizeSession::Disabled, conn)
        })
    }

    /// Returns every row as a mapping.
    ///
    /// Entity rows map wire field names to encoded values; tuple rows map
    /// labels to values, nesting entities.
    pub fn all_as_dicts(&self) -> OrmResult<Vec<Map<String, JsonValue>>> {
        self.iter()?.map(|row| row_to_dict(&row?)).collect()
    }

    /// Returns every row as a GeoJSON feature collection.
    ///
    /// `geometry_column` names an entity attribute or a result label whose
    /// value becomes each feature's geometry.
    pub fn all_as_geojson(
        &self,
        geometry_column: Option<&str>,
        excluded: &[&str],
    ) -> OrmResult<JsonValue> {
        let geometry_field = geometry_column.map(|name| self.wire_name_of(name));
        dicts_to_geojson(self.all_as_dicts()?, geometry_field.as_deref(), excluded)
    }

    /// As [`all_as_geojson`](Self::all_as_geojson), encoded as a string.
    pub fn all_as_geojson_string(
        &self,
        geometry_column: Option<&str>,
        excluded: &[&str],
    ) -> OrmResult<String> {
        Ok(serde_json::to_string(&self.all_as_geojson(geometry_column, excluded)?)?)
    }

    /// Returns every row as a columnar frame.
    ///
    /// Entity columns are named by attribute; inside tuples they are prefixed
    /// with the entity label.
    pub fn all_as_frame(&self) -> OrmResult<Frame> {
        let selections = self.plan.selections();
        let single_entity = matches!(selections.as_slice(), [Selection::Entity { .. }]);
        let names: Vec<String> = selections
            .iter()
            .flat_map(|s| match s {
                Selection::Entity { model, .. } => model
                    .columns()
                    .iter()
                    .map(|c| {
                        if single_entity {
                            c.attr().to_string()
                        } else {
                            format!("{}.{}", model.name(), c.attr())
                        }
                    })
                    .collect::<Vec<_>>(),
                Selection::Column { label, .. } => vec![label.clone()],
            })
            .collect();

        let mut frame = Frame::new(names);
        for row in self.iter()? {
            let values = match row? {
                ResultRow::Instance(instance) => instance_values(&instance),
                ResultRow::Tuple(tuple) => tuple
                    .into_values()
                    .into_iter()
                    .flat_map(|value| match value {
                        ResultValue::Instance(instance) => instance_values(&instance),
                        ResultValue::Value(v) => vec![v],
                    })
                    .collect(),
            };
            frame.push_row(values)?;
        }
        Ok(frame)
    }

    /// Executes caller SQL and materializes it with this query's selections.
    ///
    /// Entity columns are matched to result columns by wire field name.
    pub fn query_raw(&self, sql: &str) -> OrmResult<Rows> {
        self.session.ensure_active()?;
        let statement = Statement::Raw(sql.to_string());
        debug!(sql, "executing raw query");
        let cursor = self.session.with_connection(|conn| conn.execute(&statement))?;
        let selections: Vec<Selection> = self
            .plan
            .selections()
            .into_iter()
            .map(|s| match s {
                Selection::Entity { model, .. } => Selection::Entity {
                    labels: model
                        .columns()
                        .iter()
                        .map(|c| c.field_name().to_string())
                        .collect(),
                    model,
                },
                column => column,
            })
            .collect();
        Rows::new(cursor, &selections, self.page_size())
    }

    /// Positional access is not supported.
    pub fn index(&self, position: usize) -> OrmResult<ResultRow> {
        Err(OrmError::unsupported(format!("index [{}]", position)))
    }

    fn page_size(&self) -> Option<usize> {
        self.plan.yield_per().or(self.session.config().page_size)
    }

    fn wire_name_of(&self, name: &str) -> String {
        self.plan
            .selections()
            .iter()
            .find_map(|s| match s {
                Selection::Entity { model, .. } => model
                    .column(name)
                    .map(|c| c.field_name().to_string()),
                Selection::Column { .. } => None,
            })
            .unwrap_or_else(|| name.to_string())
    }
}

fn unexpected(operation: &str, output: &PlanOutput) -> OrmError {
    OrmError::validation(format!("{} returned unexpected output {:?}", operation, output))
}

fn instance_values(instance: &Instance) -> Vec<Value> {
    instance
        .model()
        .columns()
        .iter()
        .map(|c| instance.get(c.attr()).cloned().unwrap_or(Value::Null))
        .collect()
}

fn row_to_dict(row: &ResultRow) -> OrmResult<Map<String, JsonValue>> {
    match row {
        ResultRow::Instance(instance) => wire_row_to_json(&serialize(instance, &[])?),
        ResultRow::Tuple(tuple) => tuple
            .labels()
            .iter()
            .zip(tuple.values())
            .map(|(label, value)| {
                let json = match value {
                    ResultValue::Instance(i) => {
                        JsonValue::Object(wire_row_to_json(&serialize(i, &[])?)?)
                    }
                    ResultValue::Value(v) => v.to_json()?,
                };
                Ok((label.clone(), json))
            })
            .collect(),
    }
}

impl<P: QueryPlan> fmt::Display for QueryFacade<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.plan.statement() {
            Ok(select) => write!(f, "{}", Statement::Select(select)),
            Err(e) => write!(f, "<uncompilable query: {}>", e),
        }
    }
}

impl<P: QueryPlan + fmt::Debug> fmt::Debug for QueryFacade<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFacade")
            .field("plan", &self.plan)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority() {
        assert_eq!(Capability::classify("all"), Capability::Facade);
        assert_eq!(Capability::classify("update"), Capability::Facade);
        assert_eq!(Capability::classify("count"), Capability::SafePassthrough);
        assert_eq!(Capability::classify("execution_options"), Capability::SafePassthrough);
        assert_eq!(Capability::classify("get"), Capability::Unsupported);
        assert_eq!(Capability::classify("with_session"), Capability::Unsupported);
        assert_eq!(Capability::classify("filter"), Capability::Chainable);
        assert_eq!(Capability::classify("order_by"), Capability::Chainable);
    }

    #[test]
    fn test_capability_sets_are_disjoint() {
        for name in FACADE_METHODS {
            assert!(!SAFE_PASSTHROUGH.contains(name) && !UNSUPPORTED.contains(name));
        }
        for name in SAFE_PASSTHROUGH {
            assert!(!UNSUPPORTED.contains(name));
        }
    }

    #[test]
    fn test_operation_names_match_classification() {
        let ops = [
            Operation::Passthrough(PassthroughOp::Count),
            Operation::Passthrough(PassthroughOp::Cte(None)),
            Operation::Passthrough(PassthroughOp::AsScalar),
            Operation::Unsupported(UnsupportedOp::FromStatement),
            Operation::Unsupported(UnsupportedOp::PopulateExisting),
            Operation::Chain(ChainOp::Limit(1)),
            Operation::Chain(ChainOp::Distinct),
        ];
        let expected = [
            Capability::SafePassthrough,
            Capability::SafePassthrough,
            Capability::SafePassthrough,
            Capability::Unsupported,
            Capability::Unsupported,
            Capability::Chainable,
            Capability::Chainable,
        ];
        for (op, capability) in ops.iter().zip(expected) {
            assert_eq!(Capability::classify(op.name()), capability, "{}", op.name());
        }
    }
}
