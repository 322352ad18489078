//! # stratum-model
//!
//! Table mappings and the row serializer.
//!
//! - [`Model`] / [`Column`]: declarative table definitions with validated
//!   defaults and partition/cluster layout
//! - [`Instance`]: an in-memory row of a model
//! - [`serialize`] / [`parse`]: conversion to and from wire rows
//! - [`geojson`] and [`frame`]: import/export adapters
//!
//! ## Example
//!
//! ```rust
//! use stratum_model::{serialize, Column, ColumnType, Instance, Model, Value};
//!
//! let model = Model::builder("Person", "people.person")
//!     .column(Column::new("id", ColumnType::Integer).required().default(0))
//!     .column(Column::new("name", ColumnType::String { max_length: None }))
//!     .build()
//!     .unwrap();
//!
//! let ada = Instance::new(&model).with("name", "ada").unwrap();
//! let row = serialize(&ada, &[]).unwrap();
//! assert_eq!(row["id"], Value::Int(0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod column;
pub mod frame;
pub mod geojson;
mod instance;
mod model;
mod schema;
mod serialize;
mod value;

pub use column::{Column, ColumnDefault, ColumnType};
pub use frame::{parse_from_frame, Frame, FrameColumn};
pub use geojson::{dicts_to_geojson, parse_from_geojson, serialize_as_geojson, GeoJsonImport};
pub use instance::Instance;
pub use model::{LoadHook, Model, ModelBuilder};
pub use schema::{FieldSchema, Partitioning, TableSchema};
pub use serialize::{parse, parse_json, serialize, to_json, wire_row_to_json, ParseOptions, WireRow};
pub use value::{parse_date, parse_timestamp, Value};
