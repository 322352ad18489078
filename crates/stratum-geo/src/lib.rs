//! # stratum-geo
//!
//! Geometry canonicalization for warehouse geography columns.
//!
//! The warehouse accepts geographies as GeoJSON geometry objects with exactly
//! two keys, `type` and `coordinates`. This crate turns WKT text or GeoJSON
//! input into a single canonical [`GeometryValue`]:
//!
//! 1. parse into a planar `geo` geometry
//! 2. reject geometries that are not valid (self-intersecting rings, holes
//!    outside their shell, overlapping polygons)
//! 3. re-orient every polygon ring counter-clockwise, holes included
//! 4. reject shapes whose wire object would carry other keys
//!
//! Ring order is never changed. A polygon listing its hole first is parsed
//! with the hole as its shell and is rejected by validation.
//!
//! ## Example
//!
//! ```rust
//! use stratum_geo::{GeometryCodec, GeometryInput};
//!
//! let value = GeometryCodec::canonicalize(GeometryInput::Wkt(
//!     "POLYGON((0 0, 0 1, 1 1, 1 0, 0 0))",
//! ))
//! .unwrap();
//! assert_eq!(
//!     GeometryCodec::to_wire(&value),
//!     r#"{"coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,1.0],[0.0,0.0]]],"type":"Polygon"}"#
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
mod orient;
mod validate;
mod value;

pub use codec::{GeometryCodec, GeometryInput};
pub use value::{GeometryKind, GeometryValue};
