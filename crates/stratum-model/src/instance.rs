//! Model instances.

use std::collections::BTreeMap;
use std::fmt;

use stratum_common::{OrmError, OrmResult, DISPLAY_MAX_PROPERTIES, DISPLAY_MAX_VALUE_CHARS};

use crate::model::Model;
use crate::serialize::serialize;
use crate::value::Value;

/// A row of a model held in memory.
///
/// Attributes that were never set are absent, which means "use the column
/// default at serialization time". Instances are plain values: nothing
/// tracks them after construction.
#[derive(Clone)]
pub struct Instance {
    model: Model,
    values: BTreeMap<String, Value>,
}

impl Instance {
    /// Creates an instance with no attributes set.
    pub fn new(model: &Model) -> Self {
        Self {
            model: model.clone(),
            values: BTreeMap::new(),
        }
    }

    /// Returns the model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Sets an attribute.
    ///
    /// Fails with a validation error if the model has no such attribute.
    pub fn set(&mut self, attr: &str, value: impl Into<Value>) -> OrmResult<()> {
        if self.model.column(attr).is_none() {
            return Err(OrmError::validation(format!(
                "{} has no attribute '{}'",
                self.model.name(),
                attr
            )));
        }
        self.values.insert(attr.to_string(), value.into());
        Ok(())
    }

    /// Sets an attribute, builder style.
    pub fn with(mut self, attr: &str, value: impl Into<Value>) -> OrmResult<Self> {
        self.set(attr, value)?;
        Ok(self)
    }

    /// Returns an attribute value, or `None` if it was never set.
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.values.get(attr)
    }

    /// Clears an attribute back to unset.
    pub fn unset(&mut self, attr: &str) -> Option<Value> {
        self.values.remove(attr)
    }

    /// Returns the set attributes, sorted by name.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.values == other.values
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.name())
            .field("values", &self.values)
            .finish()
    }
}

impl fmt::Display for Instance {
    /// Renders `Model(k=v, ...)` from the serialized row when possible,
    /// otherwise from the set attributes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<(String, String)> = match serialize(self, &[]) {
            Ok(row) => row.into_iter().map(|(k, v)| (k, v.to_string())).collect(),
            Err(_) => self
                .values
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
        };

        let parts: Vec<String> = pairs
            .into_iter()
            .take(DISPLAY_MAX_PROPERTIES)
            .map(|(k, v)| truncate(format!("{}={}", k, v)))
            .collect();
        write!(f, "{}({})", self.model.name(), parts.join(", "))
    }
}

fn truncate(s: String) -> String {
    if s.chars().count() < DISPLAY_MAX_VALUE_CHARS {
        return s;
    }
    let mut out: String = s.chars().take(DISPLAY_MAX_VALUE_CHARS - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, ColumnType};

    fn model() -> Model {
        Model::builder("Person", "people")
            .column(Column::new("name", ColumnType::String { max_length: None }))
            .column(Column::new("age", ColumnType::Integer))
            .column(Column::new("bio", ColumnType::String { max_length: None }))
            .build()
            .unwrap()
    }

    #[test]
    fn test_set_and_get() {
        let mut person = Instance::new(&model());
        assert!(person.get("name").is_none());
        person.set("name", "ada").unwrap();
        assert_eq!(person.get("name"), Some(&Value::from("ada")));
        assert!(person.set("height", 1).is_err());
        assert_eq!(person.unset("name"), Some(Value::from("ada")));
    }

    #[test]
    fn test_display_sorted_and_truncated() {
        let person = Instance::new(&model())
            .with("name", "ada")
            .unwrap()
            .with("age", 36)
            .unwrap()
            .with("bio", "x".repeat(100))
            .unwrap();
        let shown = person.to_string();
        assert!(shown.starts_with("Person(age=36, bio=xxx"));
        assert!(shown.contains("..., name=ada)"));
        let bio = shown.split(", ").nth(1).unwrap();
        assert_eq!(bio.chars().count(), DISPLAY_MAX_VALUE_CHARS);
    }

    #[test]
    fn test_equality() {
        let a = Instance::new(&model()).with("age", 1).unwrap();
        let b = Instance::new(&model()).with("age", 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Instance::new(&model()));
    }
}
