//! Statement evaluation over in-memory tables.
//!
//! Stored values use the warehouse's own text forms: timestamps and dates are
//! strings in the wire format and geographies are canonical GeoJSON text. The
//! evaluator supports what the query builder emits, which is enough for
//! behavioral tests and nothing more.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use stratum_common::{OrmError, OrmResult};
use stratum_geo::{GeometryCodec, GeometryInput};
use stratum_model::{TableSchema, Value};
use stratum_sql::expr::{table_qualifier, AggregateFunction, ScalarFunction};
use stratum_sql::{format_value, BinaryOp, Expr, FromItem, JoinKind, SelectStatement};

/// One stored row, keyed by field name.
pub type StoredRow = BTreeMap<String, Value>;

/// A table held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    /// Live schema.
    pub schema: TableSchema,
    /// Rows in insertion order.
    pub rows: Vec<StoredRow>,
}

impl MemoryTable {
    /// Creates an empty table.
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }
}

/// Result of a SELECT: labels plus rows.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Column labels.
    pub labels: Vec<String>,
    /// Rows, one value per label.
    pub rows: Vec<Vec<Value>>,
}

/// (qualifier, field, value) triples visible to an expression.
type Scope = Vec<(String, String, Value)>;

/// Evaluates statements against a set of tables.
pub struct Evaluator<'a> {
    tables: &'a BTreeMap<String, MemoryTable>,
    default_dataset: Option<&'a str>,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator resolving unqualified names against
    /// `default_dataset`.
    pub fn new(tables: &'a BTreeMap<String, MemoryTable>, default_dataset: Option<&'a str>) -> Self {
        Self {
            tables,
            default_dataset,
        }
    }

    /// Resolves a table name to its storage key.
    pub fn table_key(&self, name: &str) -> OrmResult<String> {
        resolve_key(name, self.default_dataset)
    }

    fn table(&self, name: &str) -> OrmResult<&'a MemoryTable> {
        let key = self.table_key(name)?;
        self.tables
            .get(&key)
            .ok_or(OrmError::TableNotFound { table: key })
    }

    /// Runs a SELECT.
    pub fn select(&self, stmt: &SelectStatement) -> OrmResult<ResultSet> {
        self.select_in(stmt, &Vec::new())
    }

    /// Returns every row of a table in schema order.
    pub fn scan(&self, name: &str) -> OrmResult<ResultSet> {
        let table = self.table(name)?;
        let labels: Vec<String> = table.schema.field_names().map(str::to_string).collect();
        let rows = table
            .rows
            .iter()
            .map(|row| {
                labels
                    .iter()
                    .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(ResultSet { labels, rows })
    }

    /// Returns the indices of the rows of `table` matching `filter`.
    pub fn matching_rows(&self, table: &str, filter: Option<&Expr>) -> OrmResult<Vec<usize>> {
        let source = self.table(table)?;
        let qualifier = table_qualifier(table);
        let mut matched = Vec::new();
        for (index, row) in source.rows.iter().enumerate() {
            let scope = table_scope(qualifier, &source.schema, row);
            let keep = match filter {
                Some(expr) => truthy(&self.eval_row(expr, &scope, &Vec::new())?),
                None => true,
            };
            if keep {
                matched.push(index);
            }
        }
        Ok(matched)
    }

    /// Evaluates `expr` against one stored row of `table`.
    pub fn eval_on_row(&self, table: &str, row: &StoredRow, expr: &Expr) -> OrmResult<Value> {
        let source = self.table(table)?;
        let scope = table_scope(table_qualifier(table), &source.schema, row);
        self.eval_row(expr, &scope, &Vec::new())
    }

    fn select_in(&self, stmt: &SelectStatement, outer: &Scope) -> OrmResult<ResultSet> {
        let mut scopes = self.source(stmt.from.as_ref())?;

        for join in &stmt.joins {
            let right = self.table(&join.table)?;
            let qualifier = table_qualifier(&join.table);
            let mut joined = Vec::new();
            for left in scopes {
                let mut matched = false;
                for row in &right.rows {
                    let mut scope = left.clone();
                    scope.extend(table_scope(qualifier, &right.schema, row));
                    if truthy(&self.eval_row(&join.on, &scope, outer)?) {
                        matched = true;
                        joined.push(scope);
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut scope = left;
                    scope.extend(
                        right
                            .schema
                            .field_names()
                            .map(|f| (qualifier.to_string(), f.to_string(), Value::Null)),
                    );
                    joined.push(scope);
                }
            }
            scopes = joined;
        }

        if let Some(filter) = &stmt.filter {
            let mut kept = Vec::with_capacity(scopes.len());
            for scope in scopes {
                if truthy(&self.eval_row(filter, &scope, outer)?) {
                    kept.push(scope);
                }
            }
            scopes = kept;
        }

        let aggregated = stmt.projections.iter().any(|p| p.expr.contains_aggregate());
        let groups: Vec<Vec<Scope>> = if !stmt.group_by.is_empty() {
            let mut keyed: Vec<(String, Vec<Scope>)> = Vec::new();
            for scope in scopes {
                let key = stmt
                    .group_by
                    .iter()
                    .map(|e| self.eval_row(e, &scope, outer).map(|v| format_value(&v)))
                    .collect::<OrmResult<Vec<_>>>()?
                    .join("\u{1f}");
                match keyed.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(scope),
                    None => keyed.push((key, vec![scope])),
                }
            }
            keyed.into_iter().map(|(_, members)| members).collect()
        } else if aggregated {
            vec![scopes]
        } else {
            scopes.into_iter().map(|s| vec![s]).collect()
        };

        let mut produced = Vec::with_capacity(groups.len());
        for group in &groups {
            let values = stmt
                .projections
                .iter()
                .map(|p| self.eval_group(&p.expr, group, outer))
                .collect::<OrmResult<Vec<_>>>()?;
            let keys = stmt
                .order_by
                .iter()
                .map(|k| self.eval_group(&k.expr, group, outer))
                .collect::<OrmResult<Vec<_>>>()?;
            produced.push((keys, values));
        }

        if !stmt.order_by.is_empty() {
            produced.sort_by(|(a, _), (b, _)| {
                for ((x, y), key) in a.iter().zip(b).zip(&stmt.order_by) {
                    let ord = order_values(x, y);
                    let ord = if key.ascending { ord } else { ord.reverse() };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let mut rows: Vec<Vec<Value>> = produced.into_iter().map(|(_, values)| values).collect();
        if stmt.distinct {
            let mut seen = Vec::new();
            rows.retain(|row| {
                let key: Vec<String> = row.iter().map(format_value).collect();
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        let offset = stmt.offset.map_or(0, |n| n as usize);
        let limit = stmt.limit.map_or(usize::MAX, |n| n as usize);
        let rows = rows.into_iter().skip(offset).take(limit).collect();

        Ok(ResultSet {
            labels: stmt.labels().into_iter().map(str::to_string).collect(),
            rows,
        })
    }

    fn source(&self, from: Option<&FromItem>) -> OrmResult<Vec<Scope>> {
        match from {
            None => Ok(vec![Vec::new()]),
            Some(FromItem::Table { name }) => {
                let table = self.table(name)?;
                let qualifier = table_qualifier(name);
                Ok(table
                    .rows
                    .iter()
                    .map(|row| table_scope(qualifier, &table.schema, row))
                    .collect())
            }
            Some(FromItem::Subquery { query, alias }) => {
                let result = self.select(query)?;
                Ok(result
                    .rows
                    .into_iter()
                    .map(|row| {
                        result
                            .labels
                            .iter()
                            .zip(row)
                            .map(|(label, value)| (alias.clone(), label.clone(), value))
                            .collect()
                    })
                    .collect())
            }
        }
    }

    fn eval_group(&self, expr: &Expr, group: &[Scope], outer: &Scope) -> OrmResult<Value> {
        match expr {
            Expr::Aggregate { func, arg } => {
                let values = match arg {
                    None => return Ok(Value::Int(group.len() as i64)),
                    Some(arg) => group
                        .iter()
                        .map(|scope| self.eval_row(arg, scope, outer))
                        .collect::<OrmResult<Vec<_>>>()?,
                };
                aggregate(*func, values)
            }
            Expr::Alias { expr, .. } => self.eval_group(expr, group, outer),
            Expr::BinaryOp { left, op, right } if expr.contains_aggregate() => binary(
                *op,
                self.eval_group(left, group, outer)?,
                self.eval_group(right, group, outer)?,
            ),
            other => match group.first() {
                Some(scope) => self.eval_row(other, scope, outer),
                None => self.eval_row(other, &Vec::new(), outer).or(Ok(Value::Null)),
            },
        }
    }

    fn eval_row(&self, expr: &Expr, scope: &Scope, outer: &Scope) -> OrmResult<Value> {
        match expr {
            Expr::Column(c) => lookup(scope, &c.qualifier, c.field())
                .or_else(|| lookup(outer, &c.qualifier, c.field()))
                .ok_or_else(|| {
                    OrmError::warehouse(format!(
                        "Unrecognized name: {}.{}",
                        c.qualifier,
                        c.field()
                    ))
                }),
            Expr::Literal(v) => Ok(v.clone()),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let l = self.eval_row(left, scope, outer)?;
                    let short = matches!((op, &l), (BinaryOp::And, Value::Bool(false)) | (BinaryOp::Or, Value::Bool(true)));
                    if short {
                        return Ok(l);
                    }
                    binary(*op, l, self.eval_row(right, scope, outer)?)
                }
                _ => binary(
                    *op,
                    self.eval_row(left, scope, outer)?,
                    self.eval_row(right, scope, outer)?,
                ),
            },
            Expr::Not(e) => Ok(match self.eval_row(e, scope, outer)? {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            }),
            Expr::IsNull(e) => Ok(Value::Bool(self.eval_row(e, scope, outer)?.is_null())),
            Expr::IsNotNull(e) => Ok(Value::Bool(!self.eval_row(e, scope, outer)?.is_null())),
            Expr::Between { expr, low, high } => {
                let v = self.eval_row(expr, scope, outer)?;
                let lo = binary(BinaryOp::GtEq, v.clone(), self.eval_row(low, scope, outer)?)?;
                let hi = binary(BinaryOp::LtEq, v, self.eval_row(high, scope, outer)?)?;
                binary(BinaryOp::And, lo, hi)
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let v = self.eval_row(expr, scope, outer)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut found = false;
                for item in list {
                    let item = self.eval_row(item, scope, outer)?;
                    if compare(&v, &item) == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(found != *negated))
            }
            Expr::Function { func, args } => {
                let arg = match args.first() {
                    Some(arg) => self.eval_row(arg, scope, outer)?,
                    None => Value::Null,
                };
                scalar(*func, arg)
            }
            Expr::Aggregate { .. } => Err(OrmError::warehouse(
                "aggregate function used outside of a grouped projection",
            )),
            Expr::Alias { expr, .. } => self.eval_row(expr, scope, outer),
            Expr::Exists(query) => {
                let mut correlated = outer.clone();
                correlated.extend(scope.iter().cloned());
                Ok(Value::Bool(!self.select_in(query, &correlated)?.rows.is_empty()))
            }
            Expr::ScalarSubquery(query) => {
                let mut correlated = outer.clone();
                correlated.extend(scope.iter().cloned());
                let result = self.select_in(query, &correlated)?;
                if result.rows.len() > 1 {
                    return Err(OrmError::warehouse(
                        "Scalar subquery produced more than one element",
                    ));
                }
                Ok(result
                    .rows
                    .into_iter()
                    .next()
                    .and_then(|row| row.into_iter().next())
                    .unwrap_or(Value::Null))
            }
        }
    }
}

/// Resolves `table` or `dataset.table` to a `dataset.table` key.
pub fn resolve_key(name: &str, default_dataset: Option<&str>) -> OrmResult<String> {
    match (name.contains('.'), default_dataset) {
        (true, _) => Ok(name.to_string()),
        (false, Some(dataset)) => Ok(format!("{}.{}", dataset, name)),
        (false, None) => Err(OrmError::warehouse(format!(
            "Table name \"{}\" missing dataset while no default dataset is set",
            name
        ))),
    }
}

fn table_scope(qualifier: &str, schema: &TableSchema, row: &StoredRow) -> Scope {
    schema
        .field_names()
        .map(|f| {
            (
                qualifier.to_string(),
                f.to_string(),
                row.get(f).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

fn lookup(scope: &Scope, qualifier: &str, field: &str) -> Option<Value> {
    scope
        .iter()
        .rev()
        .find(|(q, f, _)| q == qualifier && f == field)
        .map(|(_, _, v)| v.clone())
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// SQL comparison: `None` when either side is NULL or the types differ.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort order with NULLs first.
fn order_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(a, b).unwrap_or(Ordering::Equal),
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> OrmResult<Value> {
    match op {
        BinaryOp::And => Ok(match (&l, &r) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            _ => Value::Null,
        }),
        BinaryOp::Or => Ok(match (&l, &r) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            _ => Value::Null,
        }),
        _ if l.is_null() || r.is_null() => Ok(Value::Null),
        BinaryOp::Like => match (&l, &r) {
            (Value::String(s), Value::String(p)) => Ok(Value::Bool(like(s, p))),
            _ => Err(OrmError::warehouse("LIKE requires string operands")),
        },
        _ if op.is_comparison() => {
            let ord = compare(&l, &r).ok_or_else(|| {
                OrmError::warehouse(format!("cannot compare {:?} with {:?}", l, r))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::NotEq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        _ => arithmetic(op, &l, &r),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> OrmResult<Value> {
    if let (Value::Int(x), Value::Int(y), false) = (l, r, op == BinaryOp::Divide) {
        return Ok(Value::Int(match op {
            BinaryOp::Plus => x + y,
            BinaryOp::Minus => x - y,
            _ => x * y,
        }));
    }
    let (x, y) = match (l.as_f64(), r.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(OrmError::warehouse(format!(
                "No matching signature for operator {} for {:?} and {:?}",
                op, l, r
            )))
        }
    };
    if op == BinaryOp::Divide && y == 0.0 {
        return Err(OrmError::warehouse("division by zero"));
    }
    Ok(Value::Float(match op {
        BinaryOp::Plus => x + y,
        BinaryOp::Minus => x - y,
        BinaryOp::Multiply => x * y,
        _ => x / y,
    }))
}

fn like(text: &str, pattern: &str) -> bool {
    fn matches(t: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some(('%', rest)) => (0..=t.len()).any(|i| matches(&t[i..], rest)),
            Some(('_', rest)) => !t.is_empty() && matches(&t[1..], rest),
            Some((c, rest)) => t.first() == Some(c) && matches(&t[1..], rest),
        }
    }
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    matches(&t, &p)
}

fn scalar(func: ScalarFunction, arg: Value) -> OrmResult<Value> {
    let Value::String(text) = arg else {
        return Ok(Value::Null);
    };
    match func {
        ScalarFunction::StAsGeoJson => Ok(Value::String(text)),
        ScalarFunction::StAsText => match GeometryCodec::from_wire(Some(&text))? {
            Some(geometry) => GeometryCodec::to_wkt(&geometry).map(Value::String),
            None => Ok(Value::Null),
        },
        ScalarFunction::StGeogFromGeoJson => {
            let geometry = GeometryCodec::canonicalize(GeometryInput::GeoJsonText(&text))?;
            Ok(Value::String(GeometryCodec::to_wire(&geometry)))
        }
    }
}

fn aggregate(func: AggregateFunction, values: Vec<Value>) -> OrmResult<Value> {
    let present: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match func {
        AggregateFunction::Count => Ok(Value::Int(present.len() as i64)),
        _ if present.is_empty() => Ok(Value::Null),
        AggregateFunction::Sum => {
            if present.iter().all(|v| matches!(v, Value::Int(_))) {
                Ok(Value::Int(present.iter().filter_map(Value::as_i64).sum()))
            } else {
                Ok(Value::Float(present.iter().filter_map(Value::as_f64).sum()))
            }
        }
        AggregateFunction::Avg => {
            let sum: f64 = present.iter().filter_map(Value::as_f64).sum();
            Ok(Value::Float(sum / present.len() as f64))
        }
        AggregateFunction::Min | AggregateFunction::Max => {
            let want = if func == AggregateFunction::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best = present[0].clone();
            for v in &present[1..] {
                if compare(v, &best) == Some(want) {
                    best = v.clone();
                }
            }
            Ok(best)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_patterns() {
        assert!(like("Anna", "A%"));
        assert!(like("Anna", "_nn_"));
        assert!(!like("Anna", "B%"));
        assert!(like("", "%"));
    }

    #[test]
    fn test_three_valued_logic() {
        let null = || Value::Null;
        assert_eq!(binary(BinaryOp::And, Value::Bool(false), null()).unwrap(), Value::Bool(false));
        assert_eq!(binary(BinaryOp::Or, Value::Bool(true), null()).unwrap(), Value::Bool(true));
        assert!(binary(BinaryOp::Eq, Value::Int(1), null()).unwrap().is_null());
        assert_eq!(binary(BinaryOp::Lt, Value::Int(1), Value::Float(1.5)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_aggregates_skip_nulls() {
        let values = vec![Value::Int(3), Value::Null, Value::Int(1)];
        assert_eq!(aggregate(AggregateFunction::Count, values.clone()).unwrap(), Value::Int(2));
        assert_eq!(aggregate(AggregateFunction::Sum, values.clone()).unwrap(), Value::Int(4));
        assert_eq!(aggregate(AggregateFunction::Min, values.clone()).unwrap(), Value::Int(1));
        assert_eq!(aggregate(AggregateFunction::Avg, values).unwrap(), Value::Float(2.0));
        assert!(aggregate(AggregateFunction::Max, vec![]).unwrap().is_null());
    }

    #[test]
    fn test_resolve_key() {
        assert_eq!(resolve_key("t", Some("d")).unwrap(), "d.t");
        assert_eq!(resolve_key("x.t", Some("d")).unwrap(), "x.t");
        assert!(resolve_key("t", None).is_err());
    }
}
