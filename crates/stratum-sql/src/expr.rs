//! Expression tree.
//!
//! Expressions are built from model columns and literals and compiled into
//! statement text by [`crate::statement`]. Literal operands compared to a
//! column are run through that column's bind encoder when the owning query
//! is built, so a timestamp literal is sent in the same text form the column
//! was written with.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};

use stratum_common::{OrmError, OrmResult};
use stratum_model::{Column, ColumnType, Model, Value};

use crate::statement::SelectStatement;

// =============================================================================
// Column References
// =============================================================================

/// A model column as it appears in a query.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    /// Table identifier as declared on the model.
    pub table: String,
    /// Name used to qualify the column: the last segment of the table.
    pub qualifier: String,
    /// The column definition.
    pub column: Column,
}

impl ColumnRef {
    /// Returns the wire field name.
    pub fn field(&self) -> &str {
        self.column.field_name()
    }
}

impl PartialEq for ColumnRef {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
            && self.qualifier == other.qualifier
            && self.column.attr() == other.column.attr()
    }
}

/// Returns the qualifier used for a table identifier.
pub fn table_qualifier(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

// =============================================================================
// Operators and Functions
// =============================================================================

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal.
    Eq,
    /// Not equal.
    NotEq,
    /// Less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
    /// Addition.
    Plus,
    /// Subtraction.
    Minus,
    /// Multiplication.
    Multiply,
    /// Division.
    Divide,
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// Pattern match.
    Like,
}

impl BinaryOp {
    /// Returns true for comparison operators.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
                | BinaryOp::Like
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Like => "LIKE",
        };
        write!(f, "{}", s)
    }
}

/// Scalar functions understood by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    /// Geography to well-known text.
    StAsText,
    /// Geography to GeoJSON text.
    StAsGeoJson,
    /// GeoJSON text to geography.
    StGeogFromGeoJson,
}

impl ScalarFunction {
    /// Returns the SQL function name.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarFunction::StAsText => "ST_AsText",
            ScalarFunction::StAsGeoJson => "ST_AsGeoJSON",
            ScalarFunction::StGeogFromGeoJson => "ST_GeogFromGeoJSON",
        }
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// COUNT.
    Count,
    /// SUM.
    Sum,
    /// MIN.
    Min,
    /// MAX.
    Max,
    /// AVG.
    Avg,
}

impl AggregateFunction {
    /// Returns the SQL function name.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Avg => "avg",
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference.
    Column(ColumnRef),
    /// Literal value.
    Literal(Value),
    /// Binary operation.
    BinaryOp {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical NOT.
    Not(Box<Expr>),
    /// IS NULL.
    IsNull(Box<Expr>),
    /// IS NOT NULL.
    IsNotNull(Box<Expr>),
    /// BETWEEN low AND high.
    Between {
        /// Tested expression.
        expr: Box<Expr>,
        /// Lower bound, inclusive.
        low: Box<Expr>,
        /// Upper bound, inclusive.
        high: Box<Expr>,
    },
    /// IN (list).
    InList {
        /// Tested expression.
        expr: Box<Expr>,
        /// Candidates.
        list: Vec<Expr>,
        /// NOT IN.
        negated: bool,
    },
    /// Scalar function call.
    Function {
        /// Function.
        func: ScalarFunction,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Aggregate call. A missing argument means `*`.
    Aggregate {
        /// Function.
        func: AggregateFunction,
        /// Argument.
        arg: Option<Box<Expr>>,
    },
    /// Labeled expression.
    Alias {
        /// Inner expression.
        expr: Box<Expr>,
        /// Label.
        name: String,
    },
    /// EXISTS (subquery).
    Exists(Box<SelectStatement>),
    /// A subquery returning one value.
    ScalarSubquery(Box<SelectStatement>),
}

/// Conversion into an expression operand.
pub trait IntoExpr {
    /// Converts `self` into an expression.
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

macro_rules! literal_into_expr {
    ($($t:ty),*) => {
        $(
            impl IntoExpr for $t {
                fn into_expr(self) -> Expr {
                    Expr::Literal(Value::from(self))
                }
            }
        )*
    };
}

literal_into_expr!(Value, bool, i32, i64, f64, &str, String, NaiveDateTime, NaiveDate);

/// References the column `attr` of `model`.
pub fn col(model: &Model, attr: &str) -> OrmResult<Expr> {
    let column = model.column(attr).ok_or_else(|| {
        OrmError::validation(format!("{} has no attribute '{}'", model.name(), attr))
    })?;
    Ok(Expr::Column(ColumnRef {
        table: model.table().to_string(),
        qualifier: table_qualifier(model.table()).to_string(),
        column: column.clone(),
    }))
}

/// Wraps a value as a literal.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

/// `count(*)`.
pub fn count_star() -> Expr {
    Expr::Aggregate {
        func: AggregateFunction::Count,
        arg: None,
    }
}

/// Aggregates an expression.
pub fn aggregate(func: AggregateFunction, arg: impl IntoExpr) -> Expr {
    Expr::Aggregate {
        func,
        arg: Some(Box::new(arg.into_expr())),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, right: impl IntoExpr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right.into_expr()),
        }
    }

    /// `self = other`.
    pub fn equals(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self != other`.
    pub fn not_equals(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    /// `self < other`.
    pub fn lt(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self <= other`.
    pub fn le(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    /// `self > other`.
    pub fn gt(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self >= other`.
    pub fn ge(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    /// `self LIKE pattern`.
    pub fn like(self, pattern: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Like, pattern)
    }

    /// `self + other`.
    pub fn plus(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Plus, other)
    }

    /// `self - other`.
    pub fn minus(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Minus, other)
    }

    /// `self AND other`.
    pub fn and(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    /// `self OR other`.
    pub fn or(self, other: impl IntoExpr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    /// `NOT self`.
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// `self IS NULL`.
    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    /// `self IS NOT NULL`.
    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    /// `self BETWEEN low AND high`.
    pub fn between(self, low: impl IntoExpr, high: impl IntoExpr) -> Expr {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into_expr()),
            high: Box::new(high.into_expr()),
        }
    }

    /// `self IN (list)`.
    pub fn in_list<I, T>(self, list: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: IntoExpr,
    {
        Expr::InList {
            expr: Box::new(self),
            list: list.into_iter().map(IntoExpr::into_expr).collect(),
            negated: false,
        }
    }

    /// `self NOT IN (list)`.
    pub fn not_in_list<I, T>(self, list: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: IntoExpr,
    {
        match self.in_list(list) {
            Expr::InList { expr, list, .. } => Expr::InList {
                expr,
                list,
                negated: true,
            },
            other => other,
        }
    }

    /// Labels the expression.
    pub fn label(self, name: impl Into<String>) -> Expr {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    /// Ascending sort key.
    pub fn asc(self) -> OrderByExpr {
        OrderByExpr {
            expr: self,
            ascending: true,
        }
    }

    /// Descending sort key.
    pub fn desc(self) -> OrderByExpr {
        OrderByExpr {
            expr: self,
            ascending: false,
        }
    }

    /// Returns the column definition behind this expression, if any.
    pub fn source_column(&self) -> Option<&Column> {
        match self {
            Expr::Column(c) => Some(&c.column),
            Expr::Alias { expr, .. } => expr.source_column(),
            _ => None,
        }
    }

    /// Returns the result type when it is known.
    pub fn data_type(&self) -> Option<ColumnType> {
        match self {
            Expr::Column(c) => Some(c.column.ty().clone()),
            Expr::Alias { expr, .. } => expr.data_type(),
            Expr::Aggregate {
                func: AggregateFunction::Count,
                ..
            } => Some(ColumnType::Integer),
            Expr::Aggregate { arg: Some(arg), .. } => arg.data_type(),
            Expr::BinaryOp { op, .. } if op.is_comparison() => Some(ColumnType::Boolean),
            Expr::BinaryOp {
                op: BinaryOp::And | BinaryOp::Or,
                ..
            }
            | Expr::Not(_)
            | Expr::IsNull(_)
            | Expr::IsNotNull(_)
            | Expr::Between { .. }
            | Expr::InList { .. }
            | Expr::Exists(_) => Some(ColumnType::Boolean),
            _ => None,
        }
    }

    /// Returns true if the expression contains an aggregate outside a subquery.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::BinaryOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => e.contains_aggregate(),
            Expr::Alias { expr, .. } => expr.contains_aggregate(),
            Expr::Between { expr, low, high } => {
                expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
            }
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::Function { args, .. } => args.iter().any(Expr::contains_aggregate),
            _ => false,
        }
    }

    /// Runs literals compared against a column through the column's bind
    /// encoder. Geography literals become `ST_GeogFromGeoJSON` calls.
    pub fn bind_literals(self) -> OrmResult<Expr> {
        Ok(match self {
            Expr::BinaryOp { left, op, right } => {
                let (left, right) = match (*left, *right) {
                    (Expr::Column(c), Expr::Literal(v)) => {
                        let bound = bind_literal(&c.column, v)?;
                        (Expr::Column(c), bound)
                    }
                    (Expr::Literal(v), Expr::Column(c)) => {
                        let bound = bind_literal(&c.column, v)?;
                        (bound, Expr::Column(c))
                    }
                    (l, r) => (l.bind_literals()?, r.bind_literals()?),
                };
                Expr::BinaryOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                }
            }
            Expr::Between { expr, low, high } => match *expr {
                Expr::Column(c) => Expr::Between {
                    low: Box::new(bind_operand(&c.column, *low)?),
                    high: Box::new(bind_operand(&c.column, *high)?),
                    expr: Box::new(Expr::Column(c)),
                },
                other => Expr::Between {
                    expr: Box::new(other.bind_literals()?),
                    low: Box::new(low.bind_literals()?),
                    high: Box::new(high.bind_literals()?),
                },
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => match *expr {
                Expr::Column(c) => Expr::InList {
                    list: list
                        .into_iter()
                        .map(|e| bind_operand(&c.column, e))
                        .collect::<OrmResult<_>>()?,
                    expr: Box::new(Expr::Column(c)),
                    negated,
                },
                other => Expr::InList {
                    expr: Box::new(other.bind_literals()?),
                    list: list
                        .into_iter()
                        .map(Expr::bind_literals)
                        .collect::<OrmResult<_>>()?,
                    negated,
                },
            },
            Expr::Not(e) => Expr::Not(Box::new(e.bind_literals()?)),
            Expr::IsNull(e) => Expr::IsNull(Box::new(e.bind_literals()?)),
            Expr::IsNotNull(e) => Expr::IsNotNull(Box::new(e.bind_literals()?)),
            Expr::Alias { expr, name } => Expr::Alias {
                expr: Box::new(expr.bind_literals()?),
                name,
            },
            other => other,
        })
    }
}

fn bind_operand(column: &Column, operand: Expr) -> OrmResult<Expr> {
    match operand {
        Expr::Literal(v) => bind_literal(column, v),
        other => other.bind_literals(),
    }
}

/// Encodes a literal for comparison with or assignment to `column`.
pub fn bind_literal(column: &Column, value: Value) -> OrmResult<Expr> {
    let encoded = column.encode(value)?;
    if column.ty().is_geography() && !encoded.is_null() {
        return Ok(Expr::Function {
            func: ScalarFunction::StGeogFromGeoJson,
            args: vec![Expr::Literal(encoded)],
        });
    }
    Ok(Expr::Literal(encoded))
}

/// A sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    /// Key expression.
    pub expr: Expr,
    /// Sort direction.
    pub ascending: bool,
}

impl From<Expr> for OrderByExpr {
    fn from(expr: Expr) -> Self {
        expr.asc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        Model::builder("Event", "analytics.event")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("at", ColumnType::Timestamp))
            .column(Column::new("area", ColumnType::GeographyWkt))
            .build()
            .unwrap()
    }

    #[test]
    fn test_col_resolves_attribute() {
        let model = model();
        let Expr::Column(c) = col(&model, "id").unwrap() else {
            panic!("expected column");
        };
        assert_eq!(c.qualifier, "event");
        assert_eq!(c.field(), "id");
        assert!(col(&model, "missing").is_err());
    }

    #[test]
    fn test_builders() {
        let model = model();
        let id = col(&model, "id").unwrap();
        let expr = id.clone().ge(1).and(id.clone().lt(10));
        assert!(matches!(
            expr,
            Expr::BinaryOp {
                op: BinaryOp::And,
                ..
            }
        ));
        assert_eq!(expr.data_type(), Some(ColumnType::Boolean));
        assert!(matches!(
            id.clone().not_in_list([1, 2]),
            Expr::InList { negated: true, .. }
        ));
        assert!(count_star().label("n").contains_aggregate());
        assert!(!id.desc().ascending);
    }

    #[test]
    fn test_bind_literals_encodes_operands() {
        let model = model();
        let at = NaiveDate::from_ymd_opt(2020, 5, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let bound = col(&model, "at").unwrap().gt(at).bind_literals().unwrap();
        let Expr::BinaryOp { right, .. } = bound else {
            panic!("expected binary op");
        };
        assert_eq!(*right, lit("2020-05-01 00:00:00.000000"));

        let bound = col(&model, "area")
            .unwrap()
            .equals("POINT(1 2)")
            .bind_literals()
            .unwrap();
        let Expr::BinaryOp { right, .. } = bound else {
            panic!("expected binary op");
        };
        assert!(matches!(
            *right,
            Expr::Function {
                func: ScalarFunction::StGeogFromGeoJson,
                ..
            }
        ));

        assert!(col(&model, "area")
            .unwrap()
            .equals("POLYGON((0 0, 1 1, 1 0, 0 1, 0 0))")
            .bind_literals()
            .is_err());
    }
}
