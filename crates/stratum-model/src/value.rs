//! Column values.
//!
//! A [`Value`] is what an instance holds for one column, what the serializer
//! produces for the wire, and what a cursor yields per selected column.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Number, Value as JsonValue};

use stratum_common::{OrmError, OrmResult, DATE_FORMAT, TIMESTAMP_FORMAT};
use stratum_geo::GeometryValue;

use crate::column::ColumnType;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// String value. Also carries enum members and WKT text.
    String(String),
    /// Timestamp without time zone.
    Timestamp(NaiveDateTime),
    /// Calendar date.
    Date(NaiveDate),
    /// Canonical geography.
    Geography(GeometryValue),
    /// Structured JSON, such as a GeoJSON geometry mapping.
    Json(JsonValue),
    /// Raw bytes. The warehouse wire format has no encoding for these.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as an i64, if it is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Returns the value as an f64, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the string contents, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Encodes this value as JSON.
    ///
    /// Timestamps and dates use the warehouse text formats. Non-finite floats
    /// and raw bytes have no JSON form and fail with a serialization error.
    pub fn to_json(&self) -> OrmResult<JsonValue> {
        Ok(match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => Number::from_f64(*f).map(JsonValue::Number).ok_or_else(|| {
                OrmError::serialization(format!("unrecognized float value: {}", f))
            })?,
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Timestamp(ts) => JsonValue::String(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Date(d) => JsonValue::String(d.format(DATE_FORMAT).to_string()),
            Value::Geography(g) => g.to_json_value(),
            Value::Json(j) => j.clone(),
            Value::Bytes(b) => {
                return Err(OrmError::serialization(format!(
                    "unrecognized type: bytes, value: {:?}",
                    b
                )))
            }
        })
    }

    /// Decodes a JSON value for a column of type `ty`.
    ///
    /// Temporal columns accept their warehouse text formats. Geography
    /// columns keep their raw input; it is canonicalized when serialized.
    pub fn from_json(json: &JsonValue, ty: &ColumnType) -> OrmResult<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || OrmError::validation(format!("expected {} value, got {}", ty, json));

        match ty {
            ColumnType::Integer => json.as_i64().map(Value::Int).ok_or_else(mismatch),
            ColumnType::Float => json.as_f64().map(Value::Float).ok_or_else(mismatch),
            ColumnType::Boolean => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
            ColumnType::String { .. } | ColumnType::Enum(_) | ColumnType::GeographyWkt => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            ColumnType::Timestamp => {
                let text = json.as_str().ok_or_else(mismatch)?;
                parse_timestamp(text).map(Value::Timestamp)
            }
            ColumnType::Date => {
                let text = json.as_str().ok_or_else(mismatch)?;
                parse_date(text).map(Value::Date)
            }
            ColumnType::GeographyGeoJson => Ok(match json {
                JsonValue::String(s) => Value::String(s.clone()),
                other => Value::Json(other.clone()),
            }),
        }
    }
}

/// Parses warehouse timestamp text, with or without fractional seconds.
pub fn parse_timestamp(text: &str) -> OrmResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| OrmError::validation(format!("invalid timestamp {:?}: {}", text, e)))
}

/// Parses warehouse date text.
pub fn parse_date(text: &str) -> OrmResult<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| OrmError::validation(format!("invalid date {:?}: {}", text, e)))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Value::Geography(g) => write!(f, "{}", g),
            Value::Json(j) => write!(f, "{}", j),
            Value::Bytes(b) => write!(f, "{:?}", b),
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<GeometryValue> for Value {
    fn from(v: GeometryValue) -> Self {
        Value::Geography(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json_scalars() {
        assert_eq!(Value::Int(3).to_json().unwrap(), json!(3));
        assert_eq!(Value::from("a").to_json().unwrap(), json!("a"));
        assert_eq!(Value::Null.to_json().unwrap(), JsonValue::Null);

        let ts = NaiveDate::from_ymd_opt(2019, 2, 7)
            .and_then(|d| d.and_hms_micro_opt(1, 2, 3, 4))
            .unwrap();
        assert_eq!(
            Value::Timestamp(ts).to_json().unwrap(),
            json!("2019-02-07 01:02:03.000004")
        );
    }

    #[test]
    fn test_to_json_unrecognized() {
        assert!(Value::Float(f64::NAN).to_json().is_err());
        assert!(Value::Bytes(vec![1, 2]).to_json().is_err());
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            Value::from_json(&json!(5), &ColumnType::Integer).unwrap(),
            Value::Int(5)
        );
        assert_eq!(
            Value::from_json(&JsonValue::Null, &ColumnType::Integer).unwrap(),
            Value::Null
        );
        assert!(Value::from_json(&json!("5"), &ColumnType::Integer).is_err());

        let ts = Value::from_json(&json!("2019-02-07 01:02:03.000004"), &ColumnType::Timestamp)
            .unwrap();
        assert_eq!(ts.to_json().unwrap(), json!("2019-02-07 01:02:03.000004"));

        let geometry = json!({"type": "Point", "coordinates": [1.0, 2.0]});
        assert_eq!(
            Value::from_json(&geometry, &ColumnType::GeographyGeoJson).unwrap(),
            Value::Json(geometry)
        );
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2020-01-01 00:00:00").is_ok());
        assert!(parse_timestamp("2020-01-01T00:00:00.5").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_date("2020-01-31").is_ok());
    }
}
