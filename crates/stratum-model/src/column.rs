//! Column definitions.

use std::fmt;
use std::sync::Arc;

use stratum_common::{OrmError, OrmResult, RESERVED_COLUMN_NAME, DATE_FORMAT, TIMESTAMP_FORMAT};
use stratum_geo::{GeometryCodec, GeometryInput};

use crate::value::{parse_date, parse_timestamp, Value};

/// Semantic type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// Text, optionally length-limited.
    String {
        /// Maximum length in characters.
        max_length: Option<usize>,
    },
    /// Timestamp, sent as `YYYY-MM-DD HH:MM:SS.ffffff`.
    Timestamp,
    /// Date, sent as `YYYY-MM-DD`.
    Date,
    /// Text restricted to a fixed set of members.
    Enum(Vec<String>),
    /// Geography read and written as well-known text.
    GeographyWkt,
    /// Geography read and written as GeoJSON.
    GeographyGeoJson,
}

impl ColumnType {
    /// Returns the warehouse SQL type name.
    pub fn sql_type(&self) -> String {
        match self {
            ColumnType::Integer => "INT64".to_string(),
            ColumnType::Float => "FLOAT64".to_string(),
            ColumnType::Boolean => "BOOL".to_string(),
            ColumnType::String {
                max_length: Some(n),
            } => format!("STRING({})", n),
            ColumnType::String { max_length: None } | ColumnType::Enum(_) => "STRING".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::GeographyWkt | ColumnType::GeographyGeoJson => "GEOGRAPHY".to_string(),
        }
    }

    /// Returns the load-schema field type.
    pub fn field_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::String { .. } | ColumnType::Enum(_) => "STRING",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Date => "DATE",
            ColumnType::GeographyWkt | ColumnType::GeographyGeoJson => "GEOGRAPHY",
        }
    }

    /// Returns true for either geography representation.
    pub fn is_geography(&self) -> bool {
        matches!(self, ColumnType::GeographyWkt | ColumnType::GeographyGeoJson)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Enum(members) => write!(f, "ENUM({})", members.join(", ")),
            ColumnType::GeographyWkt => write!(f, "GEOGRAPHY(WKT)"),
            ColumnType::GeographyGeoJson => write!(f, "GEOGRAPHY(GEOJSON)"),
            other => write!(f, "{}", other.sql_type()),
        }
    }
}

/// Client-side default applied at serialization time.
#[derive(Clone)]
pub enum ColumnDefault {
    /// A fixed value.
    Scalar(Value),
    /// A zero-argument function evaluated per serialized row.
    Callable(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl ColumnDefault {
    /// Materializes the default.
    pub fn value(&self) -> Value {
        match self {
            ColumnDefault::Scalar(v) => v.clone(),
            ColumnDefault::Callable(f) => f(),
        }
    }
}

impl fmt::Debug for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDefault::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            ColumnDefault::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// A column of a model.
///
/// Columns are nullable unless marked [`required`](Column::required). A
/// client-side default may only be set on a required column.
#[derive(Debug, Clone)]
pub struct Column {
    attr: String,
    wire_names: Vec<String>,
    ty: ColumnType,
    nullable: bool,
    default: Option<ColumnDefault>,
    server_default: Option<String>,
}

impl Column {
    /// Creates a nullable column whose wire name equals its attribute name.
    pub fn new(attr: impl Into<String>, ty: ColumnType) -> Self {
        let attr = attr.into();
        Self {
            wire_names: vec![attr.clone()],
            attr,
            ty,
            nullable: true,
            default: None,
            server_default: None,
        }
    }

    /// Sets an explicit wire field name.
    pub fn label(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_names = vec![wire_name.into()];
        self
    }

    /// Maps this attribute onto several physical fields.
    ///
    /// Such columns cannot be serialized.
    pub fn composite<I, S>(mut self, wire_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wire_names = wire_names.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the column as non-nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets a scalar client-side default.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Scalar(value.into()));
        self
    }

    /// Sets a callable client-side default.
    pub fn default_with<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(ColumnDefault::Callable(Arc::new(f)));
        self
    }

    /// Requests a database-side default. Always rejected by [`validate`](Column::validate).
    pub fn server_default(mut self, expr: impl Into<String>) -> Self {
        self.server_default = Some(expr.into());
        self
    }

    /// Returns the attribute name.
    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Returns the single wire field name.
    ///
    /// Fails with a serialization error for composite columns.
    pub fn wire_name(&self) -> OrmResult<&str> {
        match self.wire_names.as_slice() {
            [name] => Ok(name),
            names => Err(OrmError::serialization(format!(
                "column '{}' maps to {} fields; composite types are not supported",
                self.attr,
                names.len()
            ))),
        }
    }

    /// Returns the name used for this column in table schemas.
    ///
    /// Falls back to the attribute name for composite columns.
    pub fn field_name(&self) -> &str {
        self.wire_name().unwrap_or(&self.attr)
    }

    /// Returns the column type.
    pub fn ty(&self) -> &ColumnType {
        &self.ty
    }

    /// Returns true if NULL is allowed.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns the client-side default.
    pub fn default_value(&self) -> Option<&ColumnDefault> {
        self.default.as_ref()
    }

    /// Returns the schema mode, `NULLABLE` or `REQUIRED`.
    pub fn mode(&self) -> &'static str {
        if self.nullable {
            "NULLABLE"
        } else {
            "REQUIRED"
        }
    }

    /// Checks the declaration rules for this column.
    pub fn validate(&self) -> OrmResult<()> {
        if self.attr == RESERVED_COLUMN_NAME
            || self.wire_names.iter().any(|n| n == RESERVED_COLUMN_NAME)
        {
            return Err(OrmError::validation(format!(
                "{} is a reserved column name",
                RESERVED_COLUMN_NAME
            )));
        }
        if self.server_default.is_some() {
            return Err(OrmError::validation(format!(
                "column '{}': server defaults are not supported by the warehouse",
                self.attr
            )));
        }
        if self.default.is_some() && self.nullable {
            return Err(OrmError::validation(format!(
                "column '{}': a default requires a non-nullable column",
                self.attr
            )));
        }
        Ok(())
    }

    /// Applies the bind encoder to a non-null value.
    ///
    /// Timestamps and dates become warehouse text, enum members stay their
    /// raw string, geographies become canonical GeoJSON text.
    pub fn encode(&self, value: Value) -> OrmResult<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match (&self.ty, value) {
            (ColumnType::Timestamp, Value::Timestamp(ts)) => {
                Ok(Value::String(ts.format(TIMESTAMP_FORMAT).to_string()))
            }
            (ColumnType::Date, Value::Date(d)) => Ok(Value::String(d.format(DATE_FORMAT).to_string())),
            (ColumnType::Enum(members), Value::String(s)) => {
                if members.iter().any(|m| *m == s) {
                    Ok(Value::String(s))
                } else {
                    Err(OrmError::serialization(format!(
                        "'{}' is not among the defined enum values of column '{}'",
                        s, self.attr
                    )))
                }
            }
            (ColumnType::GeographyWkt, value) | (ColumnType::GeographyGeoJson, value) => {
                self.encode_geography(value)
            }
            (_, value) => Ok(value),
        }
    }

    fn encode_geography(&self, value: Value) -> OrmResult<Value> {
        let canonical = match (&self.ty, &value) {
            (_, Value::Geography(g)) => g.clone(),
            (ColumnType::GeographyWkt, Value::String(s)) => {
                GeometryCodec::canonicalize(GeometryInput::Wkt(s))?
            }
            (ColumnType::GeographyGeoJson, Value::String(s)) => {
                GeometryCodec::canonicalize(GeometryInput::GeoJsonText(s))?
            }
            (ColumnType::GeographyGeoJson, Value::Json(j)) => {
                GeometryCodec::canonicalize(GeometryInput::GeoJson(j))?
            }
            _ => {
                return Err(OrmError::serialization(format!(
                    "column '{}' cannot encode {:?} as {}",
                    self.attr, value, self.ty
                )))
            }
        };
        Ok(Value::String(GeometryCodec::to_wire(&canonical)))
    }

    /// Applies the result processor to a value read from the warehouse.
    ///
    /// GeoJSON geographies are decoded into canonical values. WKT
    /// geographies stay text; a GeoJSON wire string is rendered back to WKT.
    pub fn decode(&self, raw: Value) -> OrmResult<Value> {
        match (&self.ty, raw) {
            (ColumnType::GeographyGeoJson, Value::String(s)) => {
                Ok(GeometryCodec::from_wire(Some(&s))?.map_or(Value::Null, Value::Geography))
            }
            (ColumnType::GeographyWkt, Value::String(s)) if is_wire_geojson(&s) => {
                match GeometryCodec::from_wire(Some(&s))? {
                    Some(geometry) => GeometryCodec::to_wkt(&geometry).map(Value::String),
                    None => Ok(Value::Null),
                }
            }
            (ColumnType::Timestamp, Value::String(s)) => parse_timestamp(&s).map(Value::Timestamp),
            (ColumnType::Date, Value::String(s)) => parse_date(&s).map(Value::Date),
            (ColumnType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (_, raw) => Ok(raw),
        }
    }
}

fn is_wire_geojson(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with('{') || text == "null"
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_defaults_and_modes() {
        let col = Column::new("name", ColumnType::String { max_length: Some(10) });
        assert!(col.is_nullable());
        assert_eq!(col.mode(), "NULLABLE");
        assert_eq!(col.ty().sql_type(), "STRING(10)");
        assert_eq!(col.wire_name().unwrap(), "name");

        let col = Column::new("n", ColumnType::Integer).label("wire_n").required();
        assert_eq!(col.wire_name().unwrap(), "wire_n");
        assert_eq!(col.mode(), "REQUIRED");
    }

    #[test]
    fn test_validation_rules() {
        assert!(Column::new("_PARTITIONTIME", ColumnType::Timestamp)
            .validate()
            .is_err());
        assert!(Column::new("a", ColumnType::Integer).default(1).validate().is_err());
        assert!(Column::new("a", ColumnType::Integer)
            .required()
            .default(1)
            .validate()
            .is_ok());
        assert!(Column::new("a", ColumnType::Timestamp)
            .server_default("CURRENT_TIMESTAMP()")
            .validate()
            .is_err());
    }

    #[test]
    fn test_composite_wire_name() {
        let col = Column::new("point", ColumnType::Float).composite(["x", "y"]);
        let err = col.wire_name().unwrap_err();
        assert_eq!(err.code(), stratum_common::ErrorCode::Serialization);
    }

    #[test]
    fn test_callable_default() {
        let col = Column::new("a", ColumnType::Integer)
            .required()
            .default_with(|| Value::Int(7));
        assert_eq!(col.default_value().map(ColumnDefault::value), Some(Value::Int(7)));
    }

    #[test]
    fn test_encode() {
        let ts = NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        let col = Column::new("t", ColumnType::Timestamp);
        assert_eq!(
            col.encode(Value::Timestamp(ts)).unwrap(),
            Value::from("2020-01-02 03:04:05.000000")
        );

        let col = Column::new("e", ColumnType::Enum(vec!["a".into(), "b".into()]));
        assert_eq!(col.encode(Value::from("b")).unwrap(), Value::from("b"));
        assert!(col.encode(Value::from("c")).is_err());

        let col = Column::new("g", ColumnType::GeographyWkt);
        assert_eq!(
            col.encode(Value::from("POINT(1 2)")).unwrap(),
            Value::from(r#"{"coordinates":[1.0,2.0],"type":"Point"}"#)
        );
        assert!(col.encode(Value::Int(1)).is_err());
        assert_eq!(col.encode(Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_decode_geojson() {
        let col = Column::new("g", ColumnType::GeographyGeoJson);
        let decoded = col
            .decode(Value::from(r#"{"type":"Point","coordinates":[1.0,2.0]}"#))
            .unwrap();
        assert!(matches!(decoded, Value::Geography(_)));
        assert_eq!(col.decode(Value::Null).unwrap(), Value::Null);

        let col = Column::new("g", ColumnType::GeographyWkt);
        assert_eq!(
            col.decode(Value::from("POINT(1 2)")).unwrap(),
            Value::from("POINT(1 2)")
        );
    }

    #[test]
    fn test_wkt_column_decodes_its_own_wire_form() {
        let col = Column::new("g", ColumnType::GeographyWkt);
        let square = "POLYGON((0 0,0 1,1 1,1 0,0 0))";
        let wire = col.encode(Value::from(square)).unwrap();

        let decoded = col.decode(wire.clone()).unwrap();
        let text = decoded.as_str().unwrap();
        assert!(text.starts_with("POLYGON"));
        assert_eq!(col.encode(decoded.clone()).unwrap(), wire);
        assert_eq!(col.decode(Value::from("null")).unwrap(), Value::Null);
    }
}
