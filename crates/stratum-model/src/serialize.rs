//! Row serialization.
//!
//! [`serialize`] turns an instance into a wire row: a flat mapping from wire
//! field name to an encoded [`Value`]. [`parse`] goes the other way, building
//! an instance from a field mapping after applying a rename map, an ignore
//! set and caller defaults.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value as JsonValue};
use tracing::trace;

use stratum_common::OrmResult;

use crate::instance::Instance;
use crate::model::Model;
use crate::value::Value;

/// A serialized row keyed by wire field name.
pub type WireRow = BTreeMap<String, Value>;

/// Serializes an instance, skipping the attributes in `excluded`.
///
/// Unset or NULL attributes take the column default when one exists; the
/// column's bind encoder is then applied to every non-null value.
pub fn serialize(instance: &Instance, excluded: &[&str]) -> OrmResult<WireRow> {
    let mut row = WireRow::new();
    for column in instance.model().columns() {
        if excluded.contains(&column.attr()) {
            continue;
        }
        let wire_name = column.wire_name()?;

        let mut value = instance.get(column.attr()).cloned().unwrap_or(Value::Null);
        if value.is_null() {
            if let Some(default) = column.default_value() {
                value = default.value();
            }
        }

        row.insert(wire_name.to_string(), column.encode(value)?);
    }
    Ok(row)
}

/// Encodes a wire row as a JSON object.
pub fn wire_row_to_json(row: &WireRow) -> OrmResult<Map<String, JsonValue>> {
    row.iter()
        .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
        .collect()
}

/// Serializes an instance to a JSON string with sorted keys.
pub fn to_json(instance: &Instance, excluded: &[&str]) -> OrmResult<String> {
    let row = serialize(instance, excluded)?;
    Ok(serde_json::to_string(&wire_row_to_json(&row)?)?)
}

/// Options for [`parse`].
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Source key to attribute name.
    pub relabel: HashMap<String, String>,
    /// Source keys dropped before relabeling.
    pub ignore: HashSet<String>,
    /// Values used for attributes missing from the source mapping.
    pub defaults: BTreeMap<String, Value>,
}

impl ParseOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Renames a source key.
    pub fn relabel(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.relabel.insert(from.into(), to.into());
        self
    }

    /// Drops a source key.
    pub fn ignore(mut self, key: impl Into<String>) -> Self {
        self.ignore.insert(key.into());
        self
    }

    /// Supplies a value for an attribute missing from the source.
    pub fn default_value(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(attr.into(), value.into());
        self
    }

    /// Applies the ignore set then the rename map to a source key.
    fn map_key<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.ignore.contains(key) {
            return None;
        }
        Some(self.relabel.get(key).map_or(key, String::as_str))
    }
}

/// Builds an instance from a field mapping.
///
/// Keys resolve to attributes by attribute name, then by wire name. Unknown
/// and ignored keys are dropped. A value present in `fields` wins over
/// `options.defaults`, which wins over the column default.
pub fn parse<I, K>(model: &Model, fields: I, options: &ParseOptions) -> OrmResult<Instance>
where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
{
    let mut instance = Instance::new(model);
    for (key, value) in fields {
        let Some(key) = options.map_key(key.as_ref()) else {
            continue;
        };
        match model.resolve_column(key) {
            Some(column) => {
                let attr = column.attr().to_string();
                instance.set(&attr, column.decode(value)?)?;
            }
            None => trace!(model = model.name(), key, "dropping unknown field"),
        }
    }
    apply_defaults(&mut instance, model, options)?;
    Ok(instance)
}

/// Builds an instance from a JSON object, coercing each value to its
/// column's type.
pub fn parse_json(
    model: &Model,
    fields: &Map<String, JsonValue>,
    options: &ParseOptions,
) -> OrmResult<Instance> {
    let mut instance = Instance::new(model);
    for (key, json) in fields {
        let Some(key) = options.map_key(key) else {
            continue;
        };
        match model.resolve_column(key) {
            Some(column) => {
                let attr = column.attr().to_string();
                let value = column.decode(Value::from_json(json, column.ty())?)?;
                instance.set(&attr, value)?;
            }
            None => trace!(model = model.name(), key, "dropping unknown field"),
        }
    }
    apply_defaults(&mut instance, model, options)?;
    Ok(instance)
}

fn apply_defaults(instance: &mut Instance, model: &Model, options: &ParseOptions) -> OrmResult<()> {
    for (attr, value) in &options.defaults {
        if let Some(column) = model.resolve_column(attr) {
            if instance.get(column.attr()).is_none() {
                let attr = column.attr().to_string();
                instance.set(&attr, value.clone())?;
            }
        }
    }
    Ok(())
}
