//! Lazy row materialization.
//!
//! [`Rows`] owns one open cursor and turns its pages into [`ResultRow`]s.
//! With a page size it fetches that many rows at a time until a fetch comes
//! back empty; without one it fetches everything in a single call. The
//! cursor is closed when the rows run out, when an error is yielded, or when
//! the iterator is dropped early.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use stratum_common::{OrmError, OrmResult};
use stratum_model::{Column, Instance, Model, Value};
use stratum_sql::{ColumnDescription, Cursor, Row, Selection};

// =============================================================================
// Result Rows
// =============================================================================

/// One selected item of a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    /// A mapped entity.
    Instance(Instance),
    /// A column value.
    Value(Value),
}

impl ResultValue {
    /// Returns the instance, if this is one.
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            ResultValue::Instance(i) => Some(i),
            ResultValue::Value(_) => None,
        }
    }

    /// Returns the column value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResultValue::Value(v) => Some(v),
            ResultValue::Instance(_) => None,
        }
    }
}

/// A row of several selected items, addressable by label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledTuple {
    labels: Arc<[String]>,
    values: Vec<ResultValue>,
}

impl LabeledTuple {
    /// Returns the labels in selection order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the values in selection order.
    pub fn values(&self) -> &[ResultValue] {
        &self.values
    }

    /// Returns the value labeled `label`.
    pub fn get(&self, label: &str) -> Option<&ResultValue> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| &self.values[i])
    }

    /// Consumes the tuple, returning its values.
    pub fn into_values(self) -> Vec<ResultValue> {
        self.values
    }
}

impl fmt::Display for LabeledTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .labels
            .iter()
            .zip(&self.values)
            .map(|(label, value)| match value {
                ResultValue::Instance(i) => format!("{}={}", label, i),
                ResultValue::Value(v) => format!("{}={}", label, v),
            })
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// A materialized result row.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRow {
    /// The query selects exactly one entity.
    Instance(Instance),
    /// Anything else.
    Tuple(LabeledTuple),
}

impl ResultRow {
    /// Returns the instance of a single-entity row.
    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            ResultRow::Instance(i) => Some(i),
            ResultRow::Tuple(_) => None,
        }
    }

    /// Consumes the row, returning the instance of a single-entity row.
    pub fn into_instance(self) -> Option<Instance> {
        match self {
            ResultRow::Instance(i) => Some(i),
            ResultRow::Tuple(_) => None,
        }
    }

    /// Returns the tuple of a multi-item row.
    pub fn as_tuple(&self) -> Option<&LabeledTuple> {
        match self {
            ResultRow::Tuple(t) => Some(t),
            ResultRow::Instance(_) => None,
        }
    }

    fn instance_at(&mut self, slot: usize) -> Option<&mut Instance> {
        match self {
            ResultRow::Instance(i) if slot == 0 => Some(i),
            ResultRow::Tuple(t) => match t.values.get_mut(slot) {
                Some(ResultValue::Instance(i)) => Some(i),
                _ => None,
            },
            _ => None,
        }
    }
}

// =============================================================================
// Row Processors
// =============================================================================

enum Processor {
    Entity {
        model: Model,
        /// (model column index, cursor column index)
        slots: Vec<(usize, usize)>,
    },
    Column {
        index: usize,
        column: Option<Column>,
    },
}

impl Processor {
    fn build(selection: &Selection, description: &[ColumnDescription]) -> OrmResult<Self> {
        let position = |label: &str| description.iter().position(|d| d.name == label);
        match selection {
            Selection::Entity { model, labels } => {
                let slots = labels
                    .iter()
                    .enumerate()
                    .map(|(ci, label)| {
                        position(label).map(|idx| (ci, idx)).ok_or_else(|| {
                            OrmError::validation(format!(
                                "result has no column '{}' for {}",
                                label,
                                model.name()
                            ))
                        })
                    })
                    .collect::<OrmResult<_>>()?;
                Ok(Processor::Entity {
                    model: model.clone(),
                    slots,
                })
            }
            Selection::Column { expr, label } => {
                let index = position(label).ok_or_else(|| {
                    OrmError::validation(format!("result has no column '{}'", label))
                })?;
                Ok(Processor::Column {
                    index,
                    column: expr.source_column().cloned(),
                })
            }
        }
    }

    fn has_load_hooks(&self) -> bool {
        matches!(self, Processor::Entity { model, .. } if !model.load_hooks().is_empty())
    }

    fn process(&self, raw: &Row) -> OrmResult<ResultValue> {
        match self {
            Processor::Entity { model, slots } => {
                let mut instance = Instance::new(model);
                for &(ci, idx) in slots {
                    let column = &model.columns()[ci];
                    let value = column.decode(raw.get(idx).cloned().unwrap_or(Value::Null))?;
                    instance.set(column.attr(), value)?;
                }
                Ok(ResultValue::Instance(instance))
            }
            Processor::Column { index, column } => {
                let value = raw.get(*index).cloned().unwrap_or(Value::Null);
                Ok(ResultValue::Value(match column {
                    Some(column) => column.decode(value)?,
                    None => value,
                }))
            }
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A single-pass lazy sequence of result rows bound to one cursor.
pub struct Rows {
    cursor: Box<dyn Cursor>,
    processors: Vec<Processor>,
    labels: Arc<[String]>,
    single_entity: bool,
    page_size: Option<usize>,
    buffer: VecDeque<ResultRow>,
    exhausted: bool,
}

impl Rows {
    /// Binds `cursor` to the processors for `selections`.
    pub fn new(
        cursor: Box<dyn Cursor>,
        selections: &[Selection],
        page_size: Option<usize>,
    ) -> OrmResult<Self> {
        let mut cursor = cursor;
        let processors = match selections
            .iter()
            .map(|s| Processor::build(s, cursor.description()))
            .collect::<OrmResult<Vec<_>>>()
        {
            Ok(processors) => processors,
            Err(e) => {
                cursor.close();
                return Err(e);
            }
        };
        let single_entity = matches!(selections, [Selection::Entity { .. }]);
        let labels: Arc<[String]> = selections.iter().map(|s| s.name().to_string()).collect();

        Ok(Self {
            cursor,
            processors,
            labels,
            single_entity,
            page_size,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Returns true once the cursor has been released.
    pub fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }

    /// Releases the cursor. Remaining rows are discarded.
    pub fn close(&mut self) {
        self.exhausted = true;
        self.buffer.clear();
        if !self.cursor.is_closed() {
            trace!("closing result cursor");
            self.cursor.close();
        }
    }

    fn fetch_page(&mut self) -> OrmResult<()> {
        let raw = match self.page_size {
            Some(size) => {
                let page = self.cursor.fetch_many(size)?;
                if page.is_empty() {
                    self.exhausted = true;
                    return Ok(());
                }
                page
            }
            None => {
                self.exhausted = true;
                self.cursor.fetch_all()?
            }
        };
        trace!(rows = raw.len(), "fetched result page");
        let rows = self.process_page(&raw)?;
        self.buffer.extend(rows);
        Ok(())
    }

    /// Processes a page, then runs the load hooks deferred while processing.
    fn process_page(&self, raw: &[Row]) -> OrmResult<Vec<ResultRow>> {
        let mut post_load: Vec<(usize, usize)> = Vec::new();
        let mut rows = Vec::with_capacity(raw.len());

        for (r, raw_row) in raw.iter().enumerate() {
            let mut values = Vec::with_capacity(self.processors.len());
            for (slot, processor) in self.processors.iter().enumerate() {
                values.push(processor.process(raw_row)?);
                if processor.has_load_hooks() {
                    post_load.push((r, slot));
                }
            }

            let row = match (self.single_entity, values.pop()) {
                (true, Some(ResultValue::Instance(instance))) if values.is_empty() => {
                    ResultRow::Instance(instance)
                }
                (_, last) => {
                    values.extend(last);
                    ResultRow::Tuple(LabeledTuple {
                        labels: self.labels.clone(),
                        values,
                    })
                }
            };
            rows.push(row);
        }

        for (r, slot) in post_load {
            if let Some(instance) = rows[r].instance_at(slot) {
                for hook in instance.model().load_hooks().to_vec() {
                    hook(&mut *instance);
                }
            }
        }
        Ok(rows)
    }
}

impl Iterator for Rows {
    type Item = OrmResult<ResultRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(Ok(row));
            }
            if self.exhausted {
                self.close();
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.close();
                return Some(Err(e));
            }
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("labels", &self.labels)
            .field("page_size", &self.page_size)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use stratum_model::ColumnType;
    use stratum_sql::{col, count_star, ChainOp, QueryPlan, SelectQuery};

    #[derive(Default)]
    struct Log {
        fetches: Vec<Option<usize>>,
        closed: bool,
    }

    struct VecCursor {
        description: Vec<ColumnDescription>,
        rows: VecDeque<Row>,
        log: Rc<RefCell<Log>>,
    }

    impl Cursor for VecCursor {
        fn description(&self) -> &[ColumnDescription] {
            &self.description
        }
        fn fetch_many(&mut self, size: usize) -> OrmResult<Vec<Row>> {
            self.log.borrow_mut().fetches.push(Some(size));
            let n = size.min(self.rows.len());
            Ok(self.rows.drain(..n).collect())
        }
        fn fetch_all(&mut self) -> OrmResult<Vec<Row>> {
            self.log.borrow_mut().fetches.push(None);
            Ok(self.rows.drain(..).collect())
        }
        fn close(&mut self) {
            self.log.borrow_mut().closed = true;
        }
        fn is_closed(&self) -> bool {
            self.log.borrow().closed
        }
    }

    fn model() -> Model {
        Model::builder("Person", "d.person")
            .column(Column::new("id", ColumnType::Integer))
            .column(Column::new("name", ColumnType::String { max_length: None }))
            .on_load(|instance| {
                let name = instance.get("name").cloned().unwrap_or(Value::Null);
                if let Value::String(s) = name {
                    let _ = instance.set("name", s.to_uppercase());
                }
            })
            .build()
            .unwrap()
    }

    fn cursor(labels: &[&str], rows: Vec<Row>) -> (Box<dyn Cursor>, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let cursor = VecCursor {
            description: labels.iter().map(|l| ColumnDescription::new(*l)).collect(),
            rows: rows.into(),
            log: log.clone(),
        };
        (Box::new(cursor), log)
    }

    fn people(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| vec![Value::Int(i), Value::from("ada")])
            .collect()
    }

    #[test]
    fn test_single_entity_rows_with_paging() {
        let model = model();
        let selections = SelectQuery::entity(&model).selections();
        let (cursor, log) = cursor(&["id", "name"], people(5));

        let rows: Vec<ResultRow> = Rows::new(cursor, &selections, Some(2))
            .unwrap()
            .collect::<OrmResult<_>>()
            .unwrap();
        assert_eq!(rows.len(), 5);
        let first = rows[0].as_instance().unwrap();
        assert_eq!(first.get("id"), Some(&Value::Int(0)));
        assert_eq!(first.get("name"), Some(&Value::from("ADA")));

        let log = log.borrow();
        assert_eq!(log.fetches, vec![Some(2), Some(2), Some(2), Some(2)]);
        assert!(log.closed);
    }

    #[test]
    fn test_fetch_all_without_page_size() {
        let model = model();
        let selections = SelectQuery::entity(&model).selections();
        let (cursor, log) = cursor(&["id", "name"], people(3));
        let rows = Rows::new(cursor, &selections, None).unwrap();
        assert_eq!(rows.count(), 3);
        assert_eq!(log.borrow().fetches, vec![None]);
        assert!(log.borrow().closed);
    }

    #[test]
    fn test_early_drop_closes_cursor() {
        let model = model();
        let selections = SelectQuery::entity(&model).selections();
        let (cursor, log) = cursor(&["id", "name"], people(10));
        let mut rows = Rows::new(cursor, &selections, Some(3)).unwrap();
        assert!(rows.next().is_some());
        assert!(!log.borrow().closed);
        drop(rows);
        assert!(log.borrow().closed);
    }

    #[test]
    fn test_tuple_rows() {
        let model = model();
        let query = SelectQuery::columns([col(&model, "name").unwrap()])
            .apply(ChainOp::AddColumns(vec![count_star().label("n")]))
            .unwrap();
        let (cursor, _) = cursor(&["name", "n"], vec![vec![Value::from("ada"), Value::Int(2)]]);
        let mut rows = Rows::new(cursor, &query.selections(), None).unwrap();
        let row = rows.next().unwrap().unwrap();
        let tuple = row.as_tuple().unwrap();
        assert_eq!(tuple.labels(), ["name", "n"]);
        assert_eq!(tuple.get("n").and_then(ResultValue::as_value), Some(&Value::Int(2)));
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
    }

    #[test]
    fn test_missing_column_fails_and_closes() {
        let model = model();
        let query = SelectQuery::columns([col(&model, "name").unwrap()]);
        let (cursor, log) = cursor(&["other"], Vec::new());
        assert!(Rows::new(cursor, &query.selections(), None).is_err());
        assert!(log.borrow().closed);
    }

    #[test]
    fn test_entity_missing_a_column_fails_and_closes() {
        let model = model();
        let selections = SelectQuery::entity(&model).selections();
        let (cursor, log) = cursor(&["id"], vec![vec![Value::Int(1)]]);
        let err = Rows::new(cursor, &selections, None).err().unwrap();
        assert_eq!(err.code(), stratum_common::ErrorCode::Validation);
        assert!(log.borrow().closed);
    }
}
