//! GeoJSON feature collection import and export.

use serde_json::{json, Map, Value as JsonValue};

use stratum_common::{OrmError, OrmResult};

use crate::instance::Instance;
use crate::model::Model;
use crate::serialize::{parse_json, serialize, wire_row_to_json, ParseOptions};

/// Options for [`parse_from_geojson`].
#[derive(Debug, Clone, Default)]
pub struct GeoJsonImport {
    /// Attribute that receives each feature's geometry. `None` drops it.
    pub geometry_property: Option<String>,
    /// Rename map, ignore set and defaults applied to feature properties.
    pub options: ParseOptions,
    /// Accept features whose geometry is null or missing.
    pub allow_null_geometry: bool,
}

impl GeoJsonImport {
    /// Imports each feature's geometry into the named attribute.
    pub fn new(geometry_property: impl Into<String>) -> Self {
        Self {
            geometry_property: Some(geometry_property.into()),
            ..Default::default()
        }
    }

    /// Sets the property options.
    pub fn options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Accepts features without geometry.
    pub fn allow_null_geometry(mut self) -> Self {
        self.allow_null_geometry = true;
        self
    }
}

/// Converts row mappings to a feature collection.
///
/// Each mapping minus `excluded` keys minus `geometry_column` becomes the
/// feature's properties; the geometry column's value, parsed when it is
/// text, becomes the feature's geometry.
pub fn dicts_to_geojson<I>(
    rows: I,
    geometry_column: Option<&str>,
    excluded: &[&str],
) -> OrmResult<JsonValue>
where
    I: IntoIterator<Item = Map<String, JsonValue>>,
{
    let features = rows
        .into_iter()
        .map(|row| dict_to_feature(row, geometry_column, excluded))
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

fn dict_to_feature(
    row: Map<String, JsonValue>,
    geometry_column: Option<&str>,
    excluded: &[&str],
) -> OrmResult<JsonValue> {
    let mut properties: Map<String, JsonValue> = row
        .into_iter()
        .filter(|(k, _)| !excluded.contains(&k.as_str()))
        .collect();

    let mut geometry = JsonValue::Null;
    if let Some(column) = geometry_column {
        geometry = properties
            .remove(column)
            .ok_or_else(|| OrmError::MissingGeometryField {
                field: column.to_string(),
            })?;
        if let JsonValue::String(text) = &geometry {
            let parsed: JsonValue = serde_json::from_str(text)?;
            geometry = parsed;
        }
    }

    Ok(json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
    }))
}

/// Serializes instances to a feature collection string.
///
/// `geometry_column` names an attribute; its wire field carries each
/// feature's geometry.
pub fn serialize_as_geojson(
    instances: &[Instance],
    geometry_column: Option<&str>,
    excluded: &[&str],
) -> OrmResult<String> {
    let mut rows = Vec::with_capacity(instances.len());
    let mut geometry_field = geometry_column.map(str::to_string);
    for instance in instances {
        if let Some(attr) = geometry_column {
            if let Some(column) = instance.model().column(attr) {
                geometry_field = Some(column.wire_name()?.to_string());
            }
        }
        rows.push(wire_row_to_json(&serialize(instance, excluded)?)?);
    }
    let collection = dicts_to_geojson(rows, geometry_field.as_deref(), excluded)?;
    Ok(serde_json::to_string(&collection)?)
}

/// Builds instances from a feature collection.
///
/// Properties are filtered by the ignore set, then renamed. A feature
/// without geometry is rejected unless null geometries are allowed. The
/// geometry attribute must not also appear among the properties. Feature
/// values override the import defaults.
pub fn parse_from_geojson(
    model: &Model,
    collection: &JsonValue,
    import: &GeoJsonImport,
) -> OrmResult<Vec<Instance>> {
    let features = collection
        .get("features")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| OrmError::validation("GeoJSON has no features array"))?;

    let defaults_only = ParseOptions {
        defaults: import.options.defaults.clone(),
        ..Default::default()
    };

    features
        .iter()
        .map(|feature| {
            let geometry = feature.get("geometry").cloned().unwrap_or(JsonValue::Null);
            if geometry.is_null() && !import.allow_null_geometry {
                return Err(OrmError::validation(
                    "GeoJSON contained feature without geometry",
                ));
            }

            let mut properties = Map::new();
            if let Some(source) = feature.get("properties").and_then(JsonValue::as_object) {
                for (key, value) in source {
                    if import.options.ignore.contains(key) {
                        continue;
                    }
                    let key = import.options.relabel.get(key).unwrap_or(key);
                    properties.insert(key.clone(), value.clone());
                }
            }

            if let Some(name) = &import.geometry_property {
                if properties.contains_key(name) {
                    return Err(OrmError::validation(format!(
                        "geometry property {} was found in properties {}",
                        name,
                        JsonValue::Object(properties)
                    )));
                }
                properties.insert(name.clone(), geometry);
            }

            parse_json(model, &properties, &defaults_only)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, ColumnType};
    use crate::value::Value;

    fn model() -> Model {
        Model::builder("Parcel", "unittest.parcel")
            .column(Column::new("name", ColumnType::String { max_length: None }))
            .column(Column::new("size", ColumnType::Integer))
            .column(Column::new("geometry", ColumnType::GeographyGeoJson))
            .build()
            .unwrap()
    }

    fn collection() -> JsonValue {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                    "properties": {"name": "a", "size": 1}
                },
                {
                    "type": "Feature",
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                    },
                    "properties": {"name": "b", "size": 2}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [2.0, 1.0]]},
                    "properties": {"name": "c", "size": 3}
                }
            ]
        })
    }

    #[test]
    fn test_dicts_to_geojson() {
        let row = json!({"id": 1, "secret": "x", "geom": "{\"type\":\"Point\",\"coordinates\":[1.0,2.0]}"});
        let out = dicts_to_geojson(
            vec![row.as_object().cloned().unwrap()],
            Some("geom"),
            &["secret"],
        )
        .unwrap();
        assert_eq!(
            out,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
                    "properties": {"id": 1}
                }]
            })
        );
    }

    #[test]
    fn test_missing_geometry_field() {
        let row = json!({"id": 1});
        let err = dicts_to_geojson(vec![row.as_object().cloned().unwrap()], Some("geom"), &[])
            .unwrap_err();
        assert!(matches!(err, OrmError::MissingGeometryField { .. }));

        let out = dicts_to_geojson(vec![row.as_object().cloned().unwrap()], None, &[]).unwrap();
        assert_eq!(out["features"][0]["geometry"], JsonValue::Null);
    }

    #[test]
    fn test_round_trip() {
        let input = collection();
        let instances = parse_from_geojson(&model(), &input, &GeoJsonImport::new("geometry")).unwrap();
        assert_eq!(instances.len(), 3);

        let text = serialize_as_geojson(&instances, Some("geometry"), &[]).unwrap();
        let output: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_import_options() {
        let input = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": null,
                "properties": {"label": "a", "drop": true}
            }]
        });
        let import = GeoJsonImport::new("geometry")
            .options(
                ParseOptions::new()
                    .relabel("label", "name")
                    .ignore("drop")
                    .default_value("size", 7)
                    .default_value("name", "unused"),
            );
        assert!(parse_from_geojson(&model(), &input, &import).is_err());

        let instances = parse_from_geojson(&model(), &input, &import.allow_null_geometry()).unwrap();
        assert_eq!(instances[0].get("name"), Some(&Value::from("a")));
        assert_eq!(instances[0].get("size"), Some(&Value::Int(7)));
        assert_eq!(instances[0].get("geometry"), Some(&Value::Null));
    }

    #[test]
    fn test_geometry_property_collision() {
        let input = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
                "properties": {"geometry": "dup"}
            }]
        });
        assert!(parse_from_geojson(&model(), &input, &GeoJsonImport::new("geometry")).is_err());
    }
}
