//! # stratum-sql
//!
//! A small relational query builder for warehouse tables.
//!
//! - [`expr`]: expressions over model columns
//! - [`SelectQuery`]: the immutable SELECT builder, implementing [`QueryPlan`]
//! - [`statement`]: compiled statements and their SQL text
//! - [`exec`]: the [`Connection`]/[`Cursor`] contracts statements run against
//!
//! ## Example
//!
//! ```rust
//! use stratum_model::{Column, ColumnType, Model};
//! use stratum_sql::{col, ChainOp, QueryPlan, SelectQuery, Statement};
//!
//! let model = Model::builder("Person", "people.person")
//!     .column(Column::new("age", ColumnType::Integer))
//!     .build()
//!     .unwrap();
//!
//! let query = SelectQuery::entity(&model)
//!     .apply(ChainOp::Filter(col(&model, "age").unwrap().ge(18)))
//!     .unwrap();
//! let sql = Statement::Select(query.statement().unwrap()).build();
//! assert_eq!(
//!     sql,
//!     "SELECT `person`.`age` AS `age` FROM `people.person` WHERE (`person`.`age` >= 18)"
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod exec;
pub mod expr;
pub mod plan;
pub mod select;
pub mod statement;

pub use exec::{ColumnDescription, Connection, Cursor, Row};
pub use expr::{col, count_star, lit, BinaryOp, ColumnRef, Expr, IntoExpr, OrderByExpr};
pub use plan::{ChainOp, PassthroughOp, PlanOutput, QueryPlan, Selection, SynchronizeSession};
pub use select::{func, SelectItem, SelectQuery};
pub use statement::{format_value, FromItem, Join, JoinKind, Projection, SelectStatement, Statement};
