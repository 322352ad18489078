//! Compiled statements and SQL rendering.
//!
//! A [`Statement`] is the structured form of one query or DML command.
//! [`Statement::build_with_params`] renders it with `@pN` placeholders and a
//! parameter list; [`Statement::build`] inlines every parameter as a literal,
//! which is what query jobs with a destination table need.

use std::fmt::{self, Write};

use stratum_common::{DATE_FORMAT, TIMESTAMP_FORMAT};
use stratum_model::Value;

use crate::expr::{Expr, OrderByExpr};

// =============================================================================
// Statement Types
// =============================================================================

/// One projected expression and its result label.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Projected expression.
    pub expr: Expr,
    /// Result column label.
    pub label: String,
}

/// The source of a select.
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// A table, by identifier as declared.
    Table {
        /// Table identifier.
        name: String,
    },
    /// A derived table.
    Subquery {
        /// Inner query.
        query: Box<SelectStatement>,
        /// Alias columns are qualified with.
        alias: String,
    },
}

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// INNER JOIN.
    Inner,
    /// LEFT OUTER JOIN.
    Left,
}

/// A joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Join flavor.
    pub kind: JoinKind,
    /// Joined table identifier.
    pub table: String,
    /// Join condition.
    pub on: Expr,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    /// Projected columns.
    pub projections: Vec<Projection>,
    /// Primary source. `None` selects a single row of constants.
    pub from: Option<FromItem>,
    /// Joined tables.
    pub joins: Vec<Join>,
    /// WHERE predicate.
    pub filter: Option<Expr>,
    /// GROUP BY keys.
    pub group_by: Vec<Expr>,
    /// ORDER BY keys.
    pub order_by: Vec<OrderByExpr>,
    /// LIMIT.
    pub limit: Option<u64>,
    /// OFFSET.
    pub offset: Option<u64>,
    /// SELECT DISTINCT.
    pub distinct: bool,
}

impl SelectStatement {
    /// Returns the projection labels in order.
    pub fn labels(&self) -> Vec<&str> {
        self.projections.iter().map(|p| p.label.as_str()).collect()
    }

    /// Wraps this query as `SELECT count(*) AS count FROM (...) AS anon_1`.
    pub fn into_count(self) -> SelectStatement {
        SelectStatement {
            projections: vec![Projection {
                expr: crate::expr::count_star(),
                label: "count".to_string(),
            }],
            from: Some(FromItem::Subquery {
                query: Box::new(self),
                alias: "anon_1".to_string(),
            }),
            ..Default::default()
        }
    }
}

/// A compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// SELECT.
    Select(SelectStatement),
    /// UPDATE.
    Update {
        /// Table identifier.
        table: String,
        /// `field = expr` assignments.
        assignments: Vec<(String, Expr)>,
        /// WHERE predicate.
        filter: Option<Expr>,
    },
    /// DELETE.
    Delete {
        /// Table identifier.
        table: String,
        /// WHERE predicate.
        filter: Option<Expr>,
    },
    /// Caller-supplied SQL text.
    Raw(String),
}

impl Statement {
    /// Renders SQL with every parameter inlined.
    pub fn build(&self) -> String {
        let mut writer = SqlWriter::inline();
        writer.statement(self);
        writer.sql
    }

    /// Renders SQL with `@pN` placeholders and returns the parameters.
    pub fn build_with_params(&self) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::placeholders();
        writer.statement(self);
        (writer.sql, writer.params)
    }

    /// Returns true for UPDATE and DELETE.
    pub fn is_dml(&self) -> bool {
        matches!(self, Statement::Update { .. } | Statement::Delete { .. })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

// =============================================================================
// Rendering
// =============================================================================

struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    inline: bool,
}

impl SqlWriter {
    fn inline() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            inline: true,
        }
    }

    fn placeholders() -> Self {
        Self {
            inline: false,
            ..Self::inline()
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn bind(&mut self, value: &Value) {
        if self.inline || value.is_null() {
            let literal = format_value(value);
            self.push(&literal);
        } else {
            self.params.push(value.clone());
            let _ = write!(self.sql, "@p{}", self.params.len());
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Select(select) => self.select(select),
            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let _ = write!(self.sql, "UPDATE {} SET ", quote_ident(table));
                for (i, (field, expr)) in assignments.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    let _ = write!(self.sql, "{} = ", quote_ident(field));
                    self.expr(expr);
                }
                self.where_clause(filter.as_ref());
            }
            Statement::Delete { table, filter } => {
                let _ = write!(self.sql, "DELETE FROM {}", quote_ident(table));
                self.where_clause(filter.as_ref());
            }
            Statement::Raw(sql) => self.push(sql),
        }
    }

    /// DML requires a WHERE clause; an unfiltered command targets every row.
    fn where_clause(&mut self, filter: Option<&Expr>) {
        self.push(" WHERE ");
        match filter {
            Some(expr) => self.expr(expr),
            None => self.push("true"),
        }
    }

    fn select(&mut self, select: &SelectStatement) {
        self.push("SELECT ");
        if select.distinct {
            self.push("DISTINCT ");
        }
        for (i, projection) in select.projections.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&projection.expr);
            let _ = write!(self.sql, " AS {}", quote_ident(&projection.label));
        }

        match &select.from {
            Some(FromItem::Table { name }) => {
                let _ = write!(self.sql, " FROM {}", quote_ident(name));
            }
            Some(FromItem::Subquery { query, alias }) => {
                self.push(" FROM (");
                self.select(query);
                let _ = write!(self.sql, ") AS {}", quote_ident(alias));
            }
            None => {}
        }

        for join in &select.joins {
            let keyword = match join.kind {
                JoinKind::Inner => "JOIN",
                JoinKind::Left => "LEFT OUTER JOIN",
            };
            let _ = write!(self.sql, " {} {} ON ", keyword, quote_ident(&join.table));
            self.expr(&join.on);
        }

        if let Some(filter) = &select.filter {
            self.push(" WHERE ");
            self.expr(filter);
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.expr_list(&select.group_by);
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            for (i, key) in select.order_by.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.expr(&key.expr);
                if !key.ascending {
                    self.push(" DESC");
                }
            }
        }
        if let Some(limit) = select.limit {
            let _ = write!(self.sql, " LIMIT {}", limit);
        }
        if let Some(offset) = select.offset {
            let _ = write!(self.sql, " OFFSET {}", offset);
        }
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(expr);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column(c) => {
                let _ = write!(
                    self.sql,
                    "{}.{}",
                    quote_ident(&c.qualifier),
                    quote_ident(c.field())
                );
            }
            Expr::Literal(v) => self.bind(v),
            Expr::BinaryOp { left, op, right } => {
                self.push("(");
                self.expr(left);
                let _ = write!(self.sql, " {} ", op);
                self.expr(right);
                self.push(")");
            }
            Expr::Not(e) => {
                self.push("NOT (");
                self.expr(e);
                self.push(")");
            }
            Expr::IsNull(e) => {
                self.expr(e);
                self.push(" IS NULL");
            }
            Expr::IsNotNull(e) => {
                self.expr(e);
                self.push(" IS NOT NULL");
            }
            Expr::Between { expr, low, high } => {
                self.expr(expr);
                self.push(" BETWEEN ");
                self.expr(low);
                self.push(" AND ");
                self.expr(high);
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.expr_list(list);
                self.push(")");
            }
            Expr::Function { func, args } => {
                let _ = write!(self.sql, "{}(", func.name());
                self.expr_list(args);
                self.push(")");
            }
            Expr::Aggregate { func, arg } => {
                let _ = write!(self.sql, "{}(", func.name());
                match arg {
                    Some(arg) => self.expr(arg),
                    None => self.push("*"),
                }
                self.push(")");
            }
            Expr::Alias { expr, .. } => self.expr(expr),
            Expr::Exists(query) => {
                self.push("EXISTS (");
                self.select(query);
                self.push(")");
            }
            Expr::ScalarSubquery(query) => {
                self.push("(");
                self.select(query);
                self.push(")");
            }
        }
    }
}

/// Quotes an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "\\`"))
}

/// Formats a value as a SQL literal.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{:?}", f),
        Value::Float(f) => format!("CAST('{}' AS FLOAT64)", f),
        Value::String(s) => quote_string(s),
        Value::Timestamp(ts) => format!("TIMESTAMP {}", quote_string(&ts.format(TIMESTAMP_FORMAT).to_string())),
        Value::Date(d) => format!("DATE {}", quote_string(&d.format(DATE_FORMAT).to_string())),
        Value::Geography(g) => format!("ST_GeogFromGeoJSON({})", quote_string(&g.to_string())),
        Value::Json(j) => quote_string(&j.to_string()),
        Value::Bytes(b) => format!("FROM_HEX('{}')", hex_encode(b)),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Hex encodes bytes.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
