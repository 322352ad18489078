//! Columnar frames.
//!
//! A [`Frame`] is a small in-memory table of named columns, used to move
//! tabular data in and out of models without going through JSON.

use std::collections::HashMap;
use std::fmt;

use stratum_common::{OrmError, OrmResult};

use crate::instance::Instance;
use crate::model::Model;
use crate::serialize::{parse, ParseOptions};
use crate::value::Value;

/// A named column of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    name: String,
    values: Vec<Value>,
}

impl FrameColumn {
    /// Returns the column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the column values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A columnar table of values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<FrameColumn>,
    num_rows: usize,
}

impl Frame {
    /// Creates an empty frame with the given column names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: names
                .into_iter()
                .map(|name| FrameColumn {
                    name: name.into(),
                    values: Vec::new(),
                })
                .collect(),
            num_rows: 0,
        }
    }

    /// Creates a frame from rows.
    pub fn from_rows<I, S>(names: I, rows: Vec<Vec<Value>>) -> OrmResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut frame = Self::new(names);
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Appends a row.
    ///
    /// Fails with a validation error if the row width does not match.
    pub fn push_row(&mut self, row: Vec<Value>) -> OrmResult<()> {
        if row.len() != self.columns.len() {
            return Err(OrmError::validation(format!(
                "row has {} values, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.values.push(value);
        }
        self.num_rows += 1;
        Ok(())
    }

    /// Returns the number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns true if the frame has no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[FrameColumn] {
        &self.columns
    }

    /// Returns the column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns the values of a column by name.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Returns the row at the given index as `(name, value)` pairs.
    pub fn row(&self, index: usize) -> Option<Vec<(&str, &Value)>> {
        if index >= self.num_rows {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.as_str(), &c.values[index]))
                .collect(),
        )
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.column_names().join(" | "))?;
        for i in 0..self.num_rows {
            let cells: Vec<String> = self.columns.iter().map(|c| c.values[i].to_string()).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        Ok(())
    }
}

/// Builds one instance per frame row.
///
/// `relabel` maps frame column names to attribute names.
pub fn parse_from_frame(
    model: &Model,
    frame: &Frame,
    relabel: &HashMap<String, String>,
) -> OrmResult<Vec<Instance>> {
    let options = ParseOptions {
        relabel: relabel.clone(),
        ..Default::default()
    };
    (0..frame.num_rows())
        .map(|i| {
            let fields = frame
                .columns()
                .iter()
                .map(|c| (c.name(), c.values()[i].clone()));
            parse(model, fields, &options)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{Column, ColumnType};

    #[test]
    fn test_push_and_access() {
        let mut frame = Frame::new(["a", "b"]);
        frame.push_row(vec![Value::Int(1), Value::from("x")]).unwrap();
        frame.push_row(vec![Value::Int(2), Value::Null]).unwrap();
        assert!(frame.push_row(vec![Value::Int(3)]).is_err());

        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.column("a"), Some(&[Value::Int(1), Value::Int(2)][..]));
        assert_eq!(frame.row(1).unwrap()[1], ("b", &Value::Null));
        assert!(frame.row(2).is_none());
    }

    #[test]
    fn test_parse_from_frame() {
        let model = Model::builder("P", "d.p")
            .column(Column::new("name", ColumnType::String { max_length: None }))
            .column(Column::new("age", ColumnType::Integer))
            .build()
            .unwrap();
        let frame = Frame::from_rows(
            ["full_name", "age", "extra"],
            vec![
                vec![Value::from("ada"), Value::Int(36), Value::Bool(true)],
                vec![Value::from("alan"), Value::Int(41), Value::Bool(false)],
            ],
        )
        .unwrap();
        let relabel = HashMap::from([("full_name".to_string(), "name".to_string())]);

        let instances = parse_from_frame(&model, &frame, &relabel).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].get("name"), Some(&Value::from("alan")));
        assert_eq!(instances[1].get("age"), Some(&Value::Int(41)));
    }
}
