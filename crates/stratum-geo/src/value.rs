//! Canonical geometry values.

use std::fmt;

use geo::{Coord, Geometry, LineString, Polygon};
use serde::{Serialize, Serializer};
use serde_json::{json, Value as JsonValue};

/// The shape of a canonical geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// A single position.
    Point,
    /// A sequence of positions.
    LineString,
    /// A shell with optional holes.
    Polygon,
    /// Several points.
    MultiPoint,
    /// Several line strings.
    MultiLineString,
    /// Several polygons.
    MultiPolygon,
}

impl GeometryKind {
    /// Returns the GeoJSON `type` member for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::LineString => "LineString",
            Self::Polygon => "Polygon",
            Self::MultiPoint => "MultiPoint",
            Self::MultiLineString => "MultiLineString",
            Self::MultiPolygon => "MultiPolygon",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated geometry with normalized ring winding.
///
/// Values are only produced by [`GeometryCodec`](crate::GeometryCodec).
/// Equality is structural and sensitive to coordinate order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryValue {
    kind: GeometryKind,
    geometry: Geometry<f64>,
}

impl GeometryValue {
    pub(crate) fn new(kind: GeometryKind, geometry: Geometry<f64>) -> Self {
        Self { kind, geometry }
    }

    /// Returns the geometry kind.
    #[must_use]
    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    /// Returns the underlying planar geometry.
    #[must_use]
    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    /// Returns the two-key wire object `{"type", "coordinates"}`.
    #[must_use]
    pub fn to_json_value(&self) -> JsonValue {
        json!({
            "type": self.kind.as_str(),
            "coordinates": coordinates(&self.geometry),
        })
    }
}

impl Serialize for GeometryValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json_value().serialize(serializer)
    }
}

impl fmt::Display for GeometryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json_value())
    }
}

fn position(coord: Coord<f64>) -> JsonValue {
    json!([coord.x, coord.y])
}

fn positions(line: &LineString<f64>) -> JsonValue {
    JsonValue::Array(line.0.iter().copied().map(position).collect())
}

fn rings(polygon: &Polygon<f64>) -> JsonValue {
    let mut out = Vec::with_capacity(polygon.interiors().len() + 1);
    out.push(positions(polygon.exterior()));
    out.extend(polygon.interiors().iter().map(positions));
    JsonValue::Array(out)
}

fn coordinates(geometry: &Geometry<f64>) -> JsonValue {
    match geometry {
        Geometry::Point(p) => position(p.0),
        Geometry::LineString(l) => positions(l),
        Geometry::Polygon(p) => rings(p),
        Geometry::MultiPoint(mp) => JsonValue::Array(mp.0.iter().map(|p| position(p.0)).collect()),
        Geometry::MultiLineString(ml) => JsonValue::Array(ml.0.iter().map(positions).collect()),
        Geometry::MultiPolygon(mp) => JsonValue::Array(mp.0.iter().map(rings).collect()),
        // Only the kinds above are admitted by the codec.
        _ => JsonValue::Null,
    }
}
