//! Parsing, canonicalization and wire encoding of geographies.

use geo::Geometry;
use geozero::geojson::GeoJson;
use geozero::wkt::Wkt;
use geozero::{ToGeo, ToWkt};
use serde_json::Value as JsonValue;
use tracing::trace;

use stratum_common::{OrmError, OrmResult};

use crate::orient::orient;
use crate::validate::validate;
use crate::value::{GeometryKind, GeometryValue};

/// A geography in one of the accepted source formats.
#[derive(Debug, Clone, Copy)]
pub enum GeometryInput<'a> {
    /// Well-known text, e.g. `POINT(1 2)`.
    Wkt(&'a str),
    /// A GeoJSON geometry mapping.
    GeoJson(&'a JsonValue),
    /// A GeoJSON geometry serialized as text.
    GeoJsonText(&'a str),
}

/// Canonicalizes geographies and converts them to and from the wire form.
///
/// All operations are pure and perform no I/O.
pub struct GeometryCodec;

impl GeometryCodec {
    /// Parses, validates and orients a geography.
    ///
    /// Fails with a geometry error when the input cannot be parsed, is not
    /// valid, or cannot be represented as a two-key `{type, coordinates}`
    /// wire object.
    pub fn canonicalize(input: GeometryInput<'_>) -> OrmResult<GeometryValue> {
        let geometry = parse(input)?;
        validate(&geometry)?;
        let geometry = orient(geometry);
        let kind = kind_of(&geometry)?;
        trace!(?kind, "canonicalized geography");
        Ok(GeometryValue::new(kind, geometry))
    }

    /// Encodes a canonical geography as single-line GeoJSON text.
    #[must_use]
    pub fn to_wire(value: &GeometryValue) -> String {
        value.to_string()
    }

    /// Decodes a wire string returned by the warehouse.
    ///
    /// A missing value, or the JSON literal `null`, decodes to `None`.
    pub fn from_wire(raw: Option<&str>) -> OrmResult<Option<GeometryValue>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let json: JsonValue = serde_json::from_str(raw)
            .map_err(|e| OrmError::geometry(format!("malformed wire geometry: {}", e)))?;
        if json.is_null() {
            return Ok(None);
        }
        Self::canonicalize(GeometryInput::GeoJson(&json)).map(Some)
    }

    /// Renders a canonical geography as well-known text.
    pub fn to_wkt(value: &GeometryValue) -> OrmResult<String> {
        value
            .geometry()
            .to_wkt()
            .map_err(|e| OrmError::geometry(format!("cannot render WKT: {}", e)))
    }
}

fn parse(input: GeometryInput<'_>) -> OrmResult<Geometry<f64>> {
    match input {
        GeometryInput::Wkt(text) => Wkt(text)
            .to_geo()
            .map_err(|e| OrmError::geometry(format!("invalid WKT {:?}: {}", text, e))),
        GeometryInput::GeoJson(json) => {
            check_geojson_geometry(json)?;
            let text = json.to_string();
            parse_geojson(&text)
        }
        GeometryInput::GeoJsonText(text) => {
            let json: JsonValue = serde_json::from_str(text)
                .map_err(|e| OrmError::geometry(format!("malformed GeoJSON: {}", e)))?;
            check_geojson_geometry(&json)?;
            parse_geojson(text)
        }
    }
}

fn parse_geojson(text: &str) -> OrmResult<Geometry<f64>> {
    GeoJson(text)
        .to_geo()
        .map_err(|e| OrmError::geometry(format!("invalid GeoJSON {}: {}", text, e)))
}

/// Only bare geometry objects are accepted, never features.
fn check_geojson_geometry(json: &JsonValue) -> OrmResult<()> {
    match json.get("type").and_then(JsonValue::as_str) {
        Some("Feature") | Some("FeatureCollection") => Err(OrmError::geometry(
            "expected a GeoJSON geometry, found a feature",
        )),
        Some(_) => Ok(()),
        None => Err(OrmError::geometry(format!(
            "GeoJSON geometry has no type: {}",
            json
        ))),
    }
}

fn kind_of(geometry: &Geometry<f64>) -> OrmResult<GeometryKind> {
    match geometry {
        Geometry::Point(_) => Ok(GeometryKind::Point),
        Geometry::LineString(_) => Ok(GeometryKind::LineString),
        Geometry::Polygon(_) => Ok(GeometryKind::Polygon),
        Geometry::MultiPoint(_) => Ok(GeometryKind::MultiPoint),
        Geometry::MultiLineString(_) => Ok(GeometryKind::MultiLineString),
        Geometry::MultiPolygon(_) => Ok(GeometryKind::MultiPolygon),
        Geometry::GeometryCollection(_) => Err(OrmError::geometry(
            "the warehouse only understands geometries with \"type\" and \"coordinates\" \
             keys; found keys [\"geometries\", \"type\"]",
        )),
        other => Err(OrmError::geometry(format!(
            "unsupported geometry {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Polygon};
    use serde_json::json;

    const CW_SQUARE: &str = "POLYGON((0 0, 0 1, 1 1, 1 0, 0 0))";

    fn exterior_area(value: &GeometryValue) -> f64 {
        match value.geometry() {
            Geometry::Polygon(p) => Polygon::new(p.exterior().clone(), vec![]).signed_area(),
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_wkt_polygon_oriented() {
        let value = GeometryCodec::canonicalize(GeometryInput::Wkt(CW_SQUARE)).unwrap();
        assert_eq!(value.kind(), GeometryKind::Polygon);
        assert!(exterior_area(&value) > 0.0);
    }

    #[test]
    fn test_wkt_and_geojson_agree() {
        let from_wkt = GeometryCodec::canonicalize(GeometryInput::Wkt(CW_SQUARE)).unwrap();
        let mapping = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        });
        let from_json = GeometryCodec::canonicalize(GeometryInput::GeoJson(&mapping)).unwrap();
        assert_eq!(from_wkt, from_json);
    }

    #[test]
    fn test_idempotent() {
        let once = GeometryCodec::canonicalize(GeometryInput::Wkt(
            "POLYGON((0 0, 0 10, 10 10, 10 0, 0 0), (2 2, 4 2, 4 4, 2 4, 2 2))",
        ))
        .unwrap();
        let wire = GeometryCodec::to_wire(&once);
        let twice = GeometryCodec::canonicalize(GeometryInput::GeoJsonText(&wire)).unwrap();
        assert_eq!(once, twice);
        assert_eq!(GeometryCodec::to_wire(&twice), wire);
    }

    #[test]
    fn test_self_intersection_rejected() {
        let err = GeometryCodec::canonicalize(GeometryInput::Wkt(
            "POLYGON((0 0, 1 1, 1 0, 0 1, 0 0))",
        ))
        .unwrap_err();
        assert_eq!(err.code(), stratum_common::ErrorCode::Geometry);
    }

    #[test]
    fn test_geometry_collection_rejected() {
        let result = GeometryCodec::canonicalize(GeometryInput::Wkt(
            "GEOMETRYCOLLECTION(POINT(1 2), POINT(3 4))",
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_feature_rejected() {
        let feature = json!({"type": "Feature", "geometry": null, "properties": {}});
        assert!(GeometryCodec::canonicalize(GeometryInput::GeoJson(&feature)).is_err());
        assert!(GeometryCodec::canonicalize(GeometryInput::Wkt("NOT WKT")).is_err());
    }

    #[test]
    fn test_from_wire() {
        assert_eq!(GeometryCodec::from_wire(None).unwrap(), None);
        assert_eq!(GeometryCodec::from_wire(Some("null")).unwrap(), None);

        let value = GeometryCodec::from_wire(Some(r#"{"type":"Point","coordinates":[1.5,2.5]}"#))
            .unwrap()
            .unwrap();
        assert_eq!(value.to_json_value(), json!({"type": "Point", "coordinates": [1.5, 2.5]}));
        assert!(GeometryCodec::from_wire(Some("{")).is_err());
    }

    #[test]
    fn test_to_wkt() {
        let value = GeometryCodec::canonicalize(GeometryInput::Wkt("POINT(1 2)")).unwrap();
        let wkt = GeometryCodec::to_wkt(&value).unwrap();
        let reparsed = GeometryCodec::canonicalize(GeometryInput::Wkt(&wkt)).unwrap();
        assert_eq!(value, reparsed);
    }
}
