//! The default query builder.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use stratum_common::{OrmError, OrmResult};
use stratum_model::{ColumnType, Model, Value};

use crate::exec::Connection;
use crate::expr::{bind_literal, col, table_qualifier, AggregateFunction, ColumnRef, Expr, OrderByExpr, ScalarFunction};
use crate::plan::{ChainOp, PassthroughOp, PlanOutput, QueryPlan, Selection, SynchronizeSession};
use crate::statement::{FromItem, Join, Projection, SelectStatement, Statement};

/// A selected item before labeling.
#[derive(Debug, Clone)]
pub enum SelectItem {
    /// Every column of a model.
    Entity(Model),
    /// A single expression.
    Column(Expr),
}

impl SelectItem {
    fn table(&self) -> Option<&str> {
        match self {
            SelectItem::Entity(model) => Some(model.table()),
            SelectItem::Column(expr) => expr_table(expr),
        }
    }
}

fn expr_table(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(c) => Some(&c.table),
        Expr::Alias { expr, .. } => expr_table(expr),
        Expr::Aggregate { arg: Some(arg), .. } => expr_table(arg),
        Expr::Function { args, .. } => args.iter().find_map(expr_table),
        Expr::BinaryOp { left, right, .. } => expr_table(left).or_else(|| expr_table(right)),
        _ => None,
    }
}

/// An immutable SELECT builder over models and column expressions.
///
/// The first selected table is the FROM table; every other table must be
/// joined explicitly.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    items: Vec<SelectItem>,
    joins: Vec<Join>,
    filter: Option<Expr>,
    group_by: Vec<Expr>,
    order_by: Vec<OrderByExpr>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: bool,
    yield_per: Option<usize>,
    options: BTreeMap<String, String>,
}

impl SelectQuery {
    /// Selects the given items.
    pub fn new(items: Vec<SelectItem>) -> Self {
        Self {
            items,
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            yield_per: None,
            options: BTreeMap::new(),
        }
    }

    /// Selects every column of `model`.
    pub fn entity(model: &Model) -> Self {
        Self::new(vec![SelectItem::Entity(model.clone())])
    }

    /// Selects column expressions.
    pub fn columns<I>(exprs: I) -> Self
    where
        I: IntoIterator<Item = Expr>,
    {
        Self::new(exprs.into_iter().map(SelectItem::Column).collect())
    }

    /// Returns the selected items.
    pub fn items(&self) -> &[SelectItem] {
        &self.items
    }

    fn primary_entity(&self) -> Option<&Model> {
        self.items.iter().find_map(|item| match item {
            SelectItem::Entity(model) => Some(model),
            SelectItem::Column(_) => None,
        })
    }

    fn primary_table(&self) -> OrmResult<&str> {
        self.items
            .iter()
            .find_map(SelectItem::table)
            .ok_or_else(|| OrmError::validation("query selects no table"))
    }

    /// Returns the single entity targeted by UPDATE and DELETE.
    fn dml_target(&self, operation: &str) -> OrmResult<&Model> {
        match (self.items.as_slice(), self.joins.is_empty()) {
            ([SelectItem::Entity(model)], true) => Ok(model),
            _ => Err(OrmError::validation(format!(
                "{} requires a query over a single entity without joins",
                operation
            ))),
        }
    }

    fn and_filter(&mut self, expr: Expr) -> OrmResult<()> {
        let expr = expr.bind_literals()?;
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        Ok(())
    }

    fn projections(&self) -> Vec<Projection> {
        let mut projections = Vec::new();
        for selection in self.selections() {
            match selection {
                Selection::Entity { model, labels } => {
                    for (column, label) in model.columns().iter().zip(labels) {
                        let expr = Expr::Column(ColumnRef {
                            table: model.table().to_string(),
                            qualifier: table_qualifier(model.table()).to_string(),
                            column: column.clone(),
                        });
                        projections.push(Projection {
                            expr: render_geography(expr),
                            label,
                        });
                    }
                }
                Selection::Column { expr, label } => projections.push(Projection {
                    expr: render_geography(expr),
                    label,
                }),
            }
        }
        projections
    }

    fn delete_statement(&self) -> OrmResult<Statement> {
        let model = self.dml_target("delete")?;
        Ok(Statement::Delete {
            table: model.table().to_string(),
            filter: self.filter.clone(),
        })
    }
}

/// Geography columns are read back in their column's text form.
fn render_geography(expr: Expr) -> Expr {
    let func = match expr.data_type() {
        Some(ColumnType::GeographyWkt) => ScalarFunction::StAsText,
        Some(ColumnType::GeographyGeoJson) => ScalarFunction::StAsGeoJson,
        _ => return expr,
    };
    match expr {
        Expr::Alias { expr, name } => Expr::Alias {
            expr: Box::new(render_geography(*expr)),
            name,
        },
        Expr::Column(_) => Expr::Function {
            func,
            args: vec![expr],
        },
        other => other,
    }
}

fn column_label(expr: &Expr) -> (String, Option<String>) {
    match expr {
        Expr::Alias { name, .. } => (name.clone(), None),
        Expr::Column(c) => (c.field().to_string(), Some(c.qualifier.clone())),
        Expr::Aggregate { func, .. } => (func.name().to_string(), None),
        Expr::Function { func, .. } => (func.name().to_lowercase(), None),
        _ => ("anon".to_string(), None),
    }
}

impl QueryPlan for SelectQuery {
    fn apply(&self, op: ChainOp) -> OrmResult<Self> {
        let mut next = self.clone();
        match op {
            ChainOp::Filter(expr) => next.and_filter(expr)?,
            ChainOp::FilterBy(pairs) => {
                let model = self
                    .primary_entity()
                    .cloned()
                    .ok_or_else(|| OrmError::validation("filter_by requires an entity"))?;
                for (attr, value) in pairs {
                    next.and_filter(col(&model, &attr)?.equals(value))?;
                }
            }
            ChainOp::OrderBy(keys) => {
                for key in keys {
                    next.order_by.push(OrderByExpr {
                        expr: key.expr.bind_literals()?,
                        ascending: key.ascending,
                    });
                }
            }
            ChainOp::Limit(n) => next.limit = Some(n),
            ChainOp::Offset(n) => next.offset = Some(n),
            ChainOp::Join { model, on, kind } => next.joins.push(Join {
                kind,
                table: model.table().to_string(),
                on: on.bind_literals()?,
            }),
            ChainOp::Distinct => next.distinct = true,
            ChainOp::GroupBy(keys) => next.group_by.extend(keys),
            ChainOp::AddColumns(exprs) => {
                next.items.extend(exprs.into_iter().map(SelectItem::Column))
            }
            ChainOp::AddEntity(model) => next.items.push(SelectItem::Entity(model)),
            ChainOp::YieldPer(n) => {
                if n == 0 {
                    return Err(OrmError::validation("yield_per must be at least 1"));
                }
                next.yield_per = Some(n);
                next.options.insert("yield_per".to_string(), n.to_string());
            }
        }
        Ok(next)
    }

    fn passthrough(&self, op: PassthroughOp, conn: &mut dyn Connection) -> OrmResult<PlanOutput> {
        Ok(match op {
            PassthroughOp::Count => {
                let statement = Statement::Select(self.statement()?.into_count());
                debug!(sql = %statement, "executing count");
                let mut cursor = conn.execute(&statement)?;
                let rows = cursor.fetch_all();
                cursor.close();
                let count = rows?
                    .first()
                    .and_then(|row| row.first())
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                PlanOutput::Count(u64::try_from(count).unwrap_or(0))
            }
            PassthroughOp::Delete => {
                let statement = self.delete_statement()?;
                debug!(sql = %statement, "executing delete");
                PlanOutput::Deleted(conn.execute_update(&statement)?)
            }
            PassthroughOp::Exists => PlanOutput::Expr(Expr::Exists(Box::new(self.statement()?))),
            PassthroughOp::Label(name) => PlanOutput::Expr(
                Expr::ScalarSubquery(Box::new(self.statement()?)).label(name),
            ),
            PassthroughOp::AsScalar => {
                PlanOutput::Expr(Expr::ScalarSubquery(Box::new(self.statement()?)))
            }
            PassthroughOp::Subquery(alias) => PlanOutput::Subquery {
                alias: alias.unwrap_or_else(|| "anon_1".to_string()),
                query: self.statement()?,
            },
            PassthroughOp::Cte(name) => PlanOutput::Cte {
                name: name.unwrap_or_else(|| "anon_1".to_string()),
                query: self.statement()?,
            },
            PassthroughOp::Statement | PassthroughOp::Selectable => {
                PlanOutput::Statement(Statement::Select(self.statement()?))
            }
            PassthroughOp::ColumnDescriptions => PlanOutput::ColumnDescriptions(
                self.selections()
                    .iter()
                    .flat_map(Selection::describe)
                    .collect(),
            ),
            PassthroughOp::ExecutionOptions => PlanOutput::ExecutionOptions(self.options.clone()),
        })
    }

    fn update(
        &self,
        assignments: &[(&str, Value)],
        synchronize: SynchronizeSession,
        conn: &mut dyn Connection,
    ) -> OrmResult<u64> {
        let model = self.dml_target("update")?;
        if assignments.is_empty() {
            return Err(OrmError::validation("update requires at least one assignment"));
        }
        let assignments = assignments
            .iter()
            .map(|(attr, value)| {
                let column = model.column(attr).ok_or_else(|| {
                    OrmError::validation(format!("{} has no attribute '{}'", model.name(), attr))
                })?;
                Ok((
                    column.wire_name()?.to_string(),
                    bind_literal(column, value.clone())?,
                ))
            })
            .collect::<OrmResult<Vec<_>>>()?;

        if synchronize != SynchronizeSession::Disabled {
            debug!(?synchronize, "no loaded objects to synchronize");
        }

        let statement = Statement::Update {
            table: model.table().to_string(),
            assignments,
            filter: self.filter.clone(),
        };
        debug!(sql = %statement, "executing update");
        conn.execute_update(&statement)
    }

    fn statement(&self) -> OrmResult<SelectStatement> {
        let primary = self.primary_table()?;
        let mut known: Vec<&str> = vec![primary];
        known.extend(self.joins.iter().map(|j| j.table.as_str()));
        for item in &self.items {
            if let Some(table) = item.table() {
                if !known.contains(&table) {
                    return Err(OrmError::validation(format!(
                        "table {} is selected but not joined",
                        table
                    )));
                }
            }
        }

        Ok(SelectStatement {
            projections: self.projections(),
            from: Some(FromItem::Table {
                name: primary.to_string(),
            }),
            joins: self.joins.clone(),
            filter: self.filter.clone(),
            group_by: self.group_by.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            distinct: self.distinct,
        })
    }

    fn selections(&self) -> Vec<Selection> {
        // A field name shared by two selected items is qualified by its table.
        let mut field_uses: HashMap<String, usize> = HashMap::new();
        for item in &self.items {
            match item {
                SelectItem::Entity(model) => {
                    for column in model.columns() {
                        *field_uses.entry(column.field_name().to_string()).or_default() += 1;
                    }
                }
                SelectItem::Column(expr) => {
                    *field_uses.entry(column_label(expr).0).or_default() += 1;
                }
            }
        }
        let qualify = |name: String, qualifier: &str| {
            if field_uses.get(&name).copied().unwrap_or(0) > 1 {
                format!("{}_{}", qualifier, name)
            } else {
                name
            }
        };

        let mut taken: HashMap<String, usize> = HashMap::new();
        let mut unique = |label: String| {
            let n = taken.entry(label.clone()).or_default();
            *n += 1;
            if *n == 1 {
                label
            } else {
                format!("{}_{}", label, n)
            }
        };

        self.items
            .iter()
            .map(|item| match item {
                SelectItem::Entity(model) => Selection::Entity {
                    model: model.clone(),
                    labels: model
                        .columns()
                        .iter()
                        .map(|c| {
                            unique(qualify(
                                c.field_name().to_string(),
                                table_qualifier(model.table()),
                            ))
                        })
                        .collect(),
                },
                SelectItem::Column(expr) => {
                    let label = match column_label(expr) {
                        (name, Some(qualifier)) => qualify(name, &qualifier),
                        (name, None) => name,
                    };
                    Selection::Column {
                        expr: expr.clone(),
                        label: unique(label),
                    }
                }
            })
            .collect()
    }

    fn yield_per(&self) -> Option<usize> {
        self.yield_per
    }
}

/// Aggregate shorthands over a column.
pub mod func {
    use super::*;

    /// `count(expr)`.
    pub fn count(expr: Expr) -> Expr {
        crate::expr::aggregate(AggregateFunction::Count, expr)
    }

    /// `sum(expr)`.
    pub fn sum(expr: Expr) -> Expr {
        crate::expr::aggregate(AggregateFunction::Sum, expr)
    }

    /// `min(expr)`.
    pub fn min(expr: Expr) -> Expr {
        crate::expr::aggregate(AggregateFunction::Min, expr)
    }

    /// `max(expr)`.
    pub fn max(expr: Expr) -> Expr {
        crate::expr::aggregate(AggregateFunction::Max, expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ColumnDescription, Cursor, Row};
    use crate::expr::count_star;
    use crate::statement::JoinKind;
    use stratum_model::Column;

    fn person() -> Model {
        Model::builder("Person", "people.person")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("name", ColumnType::String { max_length: None }))
            .column(Column::new("home", ColumnType::GeographyWkt))
            .build()
            .unwrap()
    }

    fn pet() -> Model {
        Model::builder("Pet", "people.pet")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("owner_id", ColumnType::Integer))
            .build()
            .unwrap()
    }

    /// Records statements and answers every query with one fixed row.
    #[derive(Default)]
    struct RecordingConnection {
        executed: Vec<Statement>,
    }

    struct OneRow {
        description: Vec<ColumnDescription>,
        row: Option<Row>,
        closed: bool,
    }

    impl Cursor for OneRow {
        fn description(&self) -> &[ColumnDescription] {
            &self.description
        }
        fn fetch_many(&mut self, _size: usize) -> OrmResult<Vec<Row>> {
            Ok(self.row.take().into_iter().collect())
        }
        fn fetch_all(&mut self) -> OrmResult<Vec<Row>> {
            self.fetch_many(usize::MAX)
        }
        fn close(&mut self) {
            self.closed = true;
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    impl Connection for RecordingConnection {
        fn execute(&mut self, statement: &Statement) -> OrmResult<Box<dyn Cursor>> {
            self.executed.push(statement.clone());
            Ok(Box::new(OneRow {
                description: vec![ColumnDescription::new("count")],
                row: Some(vec![Value::Int(7)]),
                closed: false,
            }))
        }
        fn execute_update(&mut self, statement: &Statement) -> OrmResult<u64> {
            self.executed.push(statement.clone());
            Ok(3)
        }
        fn rollback(&mut self) -> OrmResult<()> {
            Ok(())
        }
        fn close(&mut self) -> OrmResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_entity_statement() {
        let model = person();
        let query = SelectQuery::entity(&model)
            .apply(ChainOp::FilterBy(vec![("name".into(), Value::from("ada"))]))
            .unwrap()
            .apply(ChainOp::Limit(5))
            .unwrap();
        let sql = Statement::Select(query.statement().unwrap()).build();
        assert_eq!(
            sql,
            "SELECT `person`.`id` AS `id`, `person`.`name` AS `name`, \
             ST_AsText(`person`.`home`) AS `home` FROM `people.person` \
             WHERE (`person`.`name` = 'ada') LIMIT 5"
        );
    }

    #[test]
    fn test_chaining_is_immutable() {
        let base = SelectQuery::entity(&person());
        let limited = base.apply(ChainOp::Limit(1)).unwrap();
        assert_eq!(base.statement().unwrap().limit, None);
        assert_eq!(limited.statement().unwrap().limit, Some(1));
        assert!(base.apply(ChainOp::YieldPer(0)).is_err());
    }

    #[test]
    fn test_labels_qualify_collisions() {
        let person = person();
        let pet = pet();
        let on = col(&pet, "owner_id").unwrap().equals(col(&person, "id").unwrap());
        let query = SelectQuery::entity(&person)
            .apply(ChainOp::Join {
                model: pet.clone(),
                on,
                kind: JoinKind::Inner,
            })
            .unwrap()
            .apply(ChainOp::AddEntity(pet.clone()))
            .unwrap()
            .apply(ChainOp::AddColumns(vec![count_star()]))
            .unwrap();
        let labels: Vec<String> = query
            .statement()
            .unwrap()
            .labels()
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(
            labels,
            ["person_id", "name", "home", "pet_id", "owner_id", "count"]
        );

        let unjoined = SelectQuery::entity(&person).apply(ChainOp::AddEntity(pet)).unwrap();
        assert!(unjoined.statement().is_err());
    }

    #[test]
    fn test_count_and_delete_execute() {
        let query = SelectQuery::entity(&person());
        let mut conn = RecordingConnection::default();

        let count = query.passthrough(PassthroughOp::Count, &mut conn).unwrap();
        assert_eq!(count, PlanOutput::Count(7));
        let deleted = query.passthrough(PassthroughOp::Delete, &mut conn).unwrap();
        assert_eq!(deleted, PlanOutput::Deleted(3));

        assert!(matches!(&conn.executed[0], Statement::Select(s) if s.projections[0].label == "count"));
        assert!(matches!(&conn.executed[1], Statement::Delete { filter: None, .. }));
    }

    #[test]
    fn test_update_binds_assignments() {
        let model = person();
        let query = SelectQuery::entity(&model)
            .apply(ChainOp::Filter(col(&model, "id").unwrap().gt(2)))
            .unwrap();
        let mut conn = RecordingConnection::default();
        let n = query
            .update(
                &[("home", Value::from("POINT(1 2)"))],
                SynchronizeSession::Disabled,
                &mut conn,
            )
            .unwrap();
        assert_eq!(n, 3);
        let sql = conn.executed[0].build();
        assert_eq!(
            sql,
            "UPDATE `people.person` SET `home` = \
             ST_GeogFromGeoJSON('{\"coordinates\":[1.0,2.0],\"type\":\"Point\"}') \
             WHERE (`person`.`id` > 2)"
        );

        assert!(query
            .update(&[("nope", Value::Int(1))], SynchronizeSession::Disabled, &mut conn)
            .is_err());
    }

    #[test]
    fn test_passthrough_builds_expressions() {
        let query = SelectQuery::entity(&person());
        let mut conn = RecordingConnection::default();
        let exists = query.passthrough(PassthroughOp::Exists, &mut conn).unwrap();
        assert!(matches!(exists, PlanOutput::Expr(Expr::Exists(_))));

        let PlanOutput::ColumnDescriptions(columns) = query
            .passthrough(PassthroughOp::ColumnDescriptions, &mut conn)
            .unwrap()
        else {
            panic!("expected descriptions");
        };
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].field_type.as_deref(), Some("GEOGRAPHY"));
        assert_eq!(columns[2].entity.as_deref(), Some("Person"));
        assert!(conn.executed.is_empty());
    }
}
