//! An in-memory [`WarehouseClient`].
//!
//! Tables, streaming inserts, load jobs, query jobs and statement connections
//! all run against shared in-process state. Jobs advance one state per poll
//! (pending, running, done) and apply their effect when they finish.
//!
//! Row validation follows the warehouse: a batch with any invalid row is
//! rejected whole, and each bad row is reported as
//! `{"index": n, "errors": [{"reason": .., "message": ..}]}`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, trace};

use stratum_client::{
    CreateDisposition, Job, JobState, JsonRow, LoadJobConfig, QueryJobRequest, TableDefinition,
    TableRef, WarehouseClient, WriteDisposition,
};
use stratum_common::{OrmError, OrmResult, DATE_FORMAT, TIMESTAMP_FORMAT};
use stratum_geo::{GeometryCodec, GeometryInput};
use stratum_model::{parse_date, parse_timestamp, FieldSchema, TableSchema, Value};
use stratum_sql::{ColumnDescription, Connection, Cursor, Row, Statement};

use crate::eval::{Evaluator, MemoryTable, ResultSet, StoredRow};

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    drop_during_next_load: bool,
    next_job: usize,
}

/// Call counters, for asserting what reached the warehouse.
#[derive(Debug, Default)]
pub struct Stats {
    /// Streaming insert calls.
    pub insert_calls: AtomicUsize,
    /// Load jobs submitted.
    pub load_jobs: AtomicUsize,
    /// Query jobs submitted.
    pub query_jobs: AtomicUsize,
    /// Statements executed on connections.
    pub statements: AtomicUsize,
    /// `fetch_many` calls on cursors.
    pub fetches: AtomicUsize,
    /// Cursors opened and not yet closed.
    pub open_cursors: AtomicUsize,
    /// Connection rollbacks.
    pub rollbacks: AtomicUsize,
    /// Connections opened.
    pub connections: AtomicUsize,
}

/// An in-memory warehouse.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<Mutex<State>>,
    stats: Arc<Stats>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MemoryWarehouse {
    /// Creates an empty warehouse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the call counters.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Returns the SQL of every statement executed so far.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Returns the stored rows of a table, in field order.
    pub fn rows(&self, table: &str) -> OrmResult<ResultSet> {
        let state = self.state.lock();
        Evaluator::new(&state.tables, None).scan(table)
    }

    /// Returns the number of stored rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Drops the destination table while the next load job is running.
    pub fn drop_table_during_next_load(&self) {
        self.state.lock().drop_during_next_load = true;
    }

    fn next_job_id(&self, kind: &str) -> String {
        let mut state = self.state.lock();
        state.next_job += 1;
        format!("{}-{}", kind, state.next_job)
    }
}

impl WarehouseClient for MemoryWarehouse {
    fn get_table(&self, table: &TableRef) -> OrmResult<TableSchema> {
        self.state
            .lock()
            .tables
            .get(&table.id())
            .map(|t| t.schema.clone())
            .ok_or(OrmError::TableNotFound { table: table.id() })
    }

    fn create_table(&self, definition: &TableDefinition) -> OrmResult<()> {
        let mut state = self.state.lock();
        let id = definition.table.id();
        if state.tables.contains_key(&id) {
            return Err(OrmError::warehouse(format!("Already Exists: Table {}", id)));
        }
        debug!(table = %id, ddl = %definition.ddl, "memory table created");
        state
            .tables
            .insert(id, MemoryTable::new(definition.schema.clone()));
        Ok(())
    }

    fn drop_table(&self, table: &TableRef) -> OrmResult<()> {
        self.state
            .lock()
            .tables
            .remove(&table.id())
            .map(|_| ())
            .ok_or(OrmError::TableNotFound { table: table.id() })
    }

    fn table_exists(&self, table: &TableRef) -> OrmResult<bool> {
        Ok(self.state.lock().tables.contains_key(&table.id()))
    }

    fn insert_rows(&self, table: &TableRef, rows: &[JsonRow]) -> OrmResult<Vec<JsonValue>> {
        self.stats.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let target = state
            .tables
            .get_mut(&table.id())
            .ok_or(OrmError::TableNotFound { table: table.id() })?;
        match convert_rows(&target.schema, rows, false) {
            Ok(converted) => {
                trace!(table = %table, rows = converted.len(), "rows streamed");
                target.rows.extend(converted);
                Ok(Vec::new())
            }
            Err(errors) => Ok(errors),
        }
    }

    fn submit_load_job(
        &self,
        payload: Bytes,
        destination: &TableRef,
        config: &LoadJobConfig,
    ) -> OrmResult<Box<dyn Job>> {
        self.stats.load_jobs.fetch_add(1, Ordering::SeqCst);
        let text = std::str::from_utf8(&payload)
            .map_err(|e| OrmError::warehouse(format!("payload is not UTF-8: {}", e)))?;
        let rows = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match serde_json::from_str::<JsonValue>(line)? {
                JsonValue::Object(row) => Ok(row),
                other => Err(OrmError::warehouse(format!("load row is not an object: {}", other))),
            })
            .collect::<OrmResult<Vec<JsonRow>>>()?;

        Ok(Box::new(MemoryJob::new(
            self.next_job_id("load"),
            self.state.clone(),
            JobWork::Load {
                destination: destination.clone(),
                rows,
                ignore_unknown_values: config.ignore_unknown_values,
            },
        )))
    }

    fn submit_query_job(&self, request: &QueryJobRequest) -> OrmResult<Box<dyn Job>> {
        self.stats.query_jobs.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().push(request.sql());
        if request.create_disposition != CreateDisposition::CreateNever
            || request.write_disposition != WriteDisposition::WriteAppend
        {
            return Err(OrmError::warehouse(
                "memory warehouse only runs append-only query jobs",
            ));
        }
        Ok(Box::new(MemoryJob::new(
            self.next_job_id("query"),
            self.state.clone(),
            JobWork::Query {
                statement: request.statement.clone(),
                destination: request.destination.clone(),
            },
        )))
    }

    fn connect(&self, default_dataset: Option<&str>) -> OrmResult<Box<dyn Connection>> {
        self.stats.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            warehouse: self.clone(),
            default_dataset: default_dataset.map(str::to_string),
            closed: false,
        }))
    }
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Converts JSON rows for `schema`, or returns the per-row errors.
fn convert_rows(
    schema: &TableSchema,
    rows: &[JsonRow],
    ignore_unknown_values: bool,
) -> Result<Vec<StoredRow>, Vec<JsonValue>> {
    let mut converted = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        match convert_row(schema, row, ignore_unknown_values) {
            Ok(stored) => converted.push(stored),
            Err(messages) => errors.push(json!({
                "index": index,
                "errors": messages
                    .into_iter()
                    .map(|m| json!({"reason": "invalid", "message": m}))
                    .collect::<Vec<_>>(),
            })),
        }
    }
    if errors.is_empty() {
        Ok(converted)
    } else {
        Err(errors)
    }
}

fn convert_row(
    schema: &TableSchema,
    row: &JsonRow,
    ignore_unknown_values: bool,
) -> Result<StoredRow, Vec<String>> {
    let mut messages = Vec::new();
    if !ignore_unknown_values {
        for key in row.keys() {
            if schema.field(key).is_none() {
                messages.push(format!("no such field: {}.", key));
            }
        }
    }
    let mut stored = StoredRow::new();
    for field in &schema.fields {
        let raw = row.get(&field.name).unwrap_or(&JsonValue::Null);
        match coerce(field, json_to_value(raw)) {
            Ok(value) => {
                stored.insert(field.name.clone(), value);
            }
            Err(message) => messages.push(message),
        }
    }
    if messages.is_empty() {
        Ok(stored)
    } else {
        Err(messages)
    }
}

fn json_to_value(json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        JsonValue::String(s) => Value::String(s.clone()),
        other => Value::Json(other.clone()),
    }
}

/// Converts a value to the stored form of `field`.
fn coerce(field: &FieldSchema, value: Value) -> Result<Value, String> {
    if value.is_null() {
        return if field.is_nullable() {
            Ok(Value::Null)
        } else {
            Err(format!("Missing required field: {}.", field.name))
        };
    }
    let mismatch = |value: &Value| {
        format!(
            "Cannot convert value {} to {} for field {}.",
            value, field.field_type, field.name
        )
    };
    match (field.field_type.as_str(), value) {
        ("INTEGER", Value::Int(i)) => Ok(Value::Int(i)),
        ("INTEGER", Value::String(s)) => s
            .parse()
            .map(Value::Int)
            .map_err(|_| mismatch(&Value::String(s))),
        ("FLOAT", v @ (Value::Int(_) | Value::Float(_))) => {
            Ok(Value::Float(v.as_f64().unwrap_or_default()))
        }
        ("BOOLEAN", Value::Bool(b)) => Ok(Value::Bool(b)),
        ("STRING", Value::String(s)) => Ok(Value::String(s)),
        ("TIMESTAMP", Value::String(s)) => parse_timestamp(&s)
            .map(|ts| Value::String(ts.format(TIMESTAMP_FORMAT).to_string()))
            .map_err(|e| e.to_string()),
        ("DATE", Value::String(s)) => parse_date(&s)
            .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
            .map_err(|e| e.to_string()),
        ("GEOGRAPHY", Value::String(s)) => GeometryCodec::canonicalize(GeometryInput::GeoJsonText(&s))
            .or_else(|_| GeometryCodec::canonicalize(GeometryInput::Wkt(&s)))
            .map(|g| Value::String(GeometryCodec::to_wire(&g)))
            .map_err(|e| e.to_string()),
        ("GEOGRAPHY", Value::Json(j)) => GeometryCodec::canonicalize(GeometryInput::GeoJson(&j))
            .map(|g| Value::String(GeometryCodec::to_wire(&g)))
            .map_err(|e| e.to_string()),
        (_, value) => Err(mismatch(&value)),
    }
}

// =============================================================================
// Jobs
// =============================================================================

enum JobWork {
    Load {
        destination: TableRef,
        rows: Vec<JsonRow>,
        ignore_unknown_values: bool,
    },
    Query {
        statement: Statement,
        destination: TableRef,
    },
}

struct MemoryJob {
    id: String,
    state: Arc<Mutex<State>>,
    job_state: JobState,
    work: JobWork,
    errors: Vec<JsonValue>,
    error_result: Option<JsonValue>,
}

impl MemoryJob {
    fn new(id: String, state: Arc<Mutex<State>>, work: JobWork) -> Self {
        Self {
            id,
            state,
            job_state: JobState::Pending,
            work,
            errors: Vec::new(),
            error_result: None,
        }
    }

    fn fail(&mut self, reason: &str, message: String, errors: Vec<JsonValue>) {
        let error = json!({"reason": reason, "message": message});
        self.errors = if errors.is_empty() {
            vec![error.clone()]
        } else {
            errors
        };
        self.error_result = Some(error);
    }

    fn start(&mut self) {
        let mut state = self.state.lock();
        if let JobWork::Load { destination, .. } = &self.work {
            if state.drop_during_next_load {
                state.drop_during_next_load = false;
                state.tables.remove(&destination.id());
                debug!(job_id = %self.id, table = %destination, "table dropped under running load");
            }
        }
    }

    fn finish(&mut self) {
        let outcome = {
            let mut state = self.state.lock();
            match &self.work {
                JobWork::Load {
                    destination,
                    rows,
                    ignore_unknown_values,
                } => finish_load(&mut state, destination, rows, *ignore_unknown_values),
                JobWork::Query {
                    statement,
                    destination,
                } => finish_query(&mut state, statement, destination),
            }
        };
        if let Err((reason, message, errors)) = outcome {
            self.fail(reason, message, errors);
        }
    }
}

type JobFailure = (&'static str, String, Vec<JsonValue>);

fn not_found(table: &TableRef) -> JobFailure {
    ("notFound", format!("Not found: Table {}", table), Vec::new())
}

fn finish_load(
    state: &mut State,
    destination: &TableRef,
    rows: &[JsonRow],
    ignore_unknown_values: bool,
) -> Result<(), JobFailure> {
    let table = state
        .tables
        .get_mut(&destination.id())
        .ok_or_else(|| not_found(destination))?;
    let converted = convert_rows(&table.schema, rows, ignore_unknown_values).map_err(|errors| {
        (
            "invalid",
            "Error while reading data, error message: JSON table encountered too many errors"
                .to_string(),
            errors,
        )
    })?;
    table.rows.extend(converted);
    Ok(())
}

fn finish_query(
    state: &mut State,
    statement: &Statement,
    destination: &TableRef,
) -> Result<(), JobFailure> {
    let Statement::Select(select) = statement else {
        return Err(("invalid", "query jobs run SELECT statements".to_string(), Vec::new()));
    };
    let result = Evaluator::new(&state.tables, Some(destination.dataset.as_str()))
        .select(select)
        .map_err(|e| ("invalidQuery", e.to_string(), Vec::new()))?;
    let table = state
        .tables
        .get_mut(&destination.id())
        .ok_or_else(|| not_found(destination))?;

    let mut appended = Vec::with_capacity(result.rows.len());
    let mut errors = Vec::new();
    for (index, row) in result.rows.into_iter().enumerate() {
        let mut stored = StoredRow::new();
        let mut messages = Vec::new();
        let mut by_label: BTreeMap<&str, Value> = result.labels.iter().map(String::as_str).zip(row).collect();
        for field in &table.schema.fields {
            let value = by_label.remove(field.name.as_str()).unwrap_or(Value::Null);
            match coerce(field, value) {
                Ok(v) => {
                    stored.insert(field.name.clone(), v);
                }
                Err(m) => messages.push(m),
            }
        }
        messages.extend(by_label.keys().map(|k| format!("no such field: {}.", k)));
        if messages.is_empty() {
            appended.push(stored);
        } else {
            errors.push(json!({"index": index, "errors": messages}));
        }
    }
    if !errors.is_empty() {
        return Err(("invalid", "query result does not match destination schema".to_string(), errors));
    }
    table.rows.extend(appended);
    Ok(())
}

impl Job for MemoryJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self) -> OrmResult<JobState> {
        self.job_state = match self.job_state {
            JobState::Pending => {
                self.start();
                JobState::Running
            }
            JobState::Running => {
                self.finish();
                JobState::Done
            }
            JobState::Done => JobState::Done,
        };
        Ok(self.job_state)
    }

    fn errors(&self) -> &[JsonValue] {
        &self.errors
    }

    fn error_result(&self) -> Option<&JsonValue> {
        self.error_result.as_ref()
    }
}

// =============================================================================
// Connections
// =============================================================================

struct MemoryConnection {
    warehouse: MemoryWarehouse,
    default_dataset: Option<String>,
    closed: bool,
}

impl MemoryConnection {
    fn check_open(&self) -> OrmResult<()> {
        if self.closed {
            Err(OrmError::warehouse("connection is closed"))
        } else {
            Ok(())
        }
    }

    fn record(&self, statement: &Statement) {
        self.warehouse.stats.statements.fetch_add(1, Ordering::SeqCst);
        self.warehouse.executed.lock().push(statement.build());
    }

    fn run_select(&self, statement: &Statement) -> OrmResult<ResultSet> {
        let state = self.warehouse.state.lock();
        let evaluator = Evaluator::new(&state.tables, self.default_dataset.as_deref());
        match statement {
            Statement::Select(select) => evaluator.select(select),
            Statement::Raw(sql) => evaluator.scan(raw_table(sql)?),
            _ => Err(OrmError::warehouse("statement returns no rows")),
        }
    }
}

/// Accepts `SELECT * FROM table`, with or without backticks.
fn raw_table(sql: &str) -> OrmResult<&str> {
    let sql = sql.trim().trim_end_matches(';');
    let prefix = "SELECT * FROM ";
    if let Some(rest) = sql
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| sql.get(prefix.len()..))
    {
        let table = rest.trim().trim_matches('`');
        if !table.is_empty() && !table.contains(char::is_whitespace) {
            return Ok(table);
        }
    }
    Err(OrmError::warehouse(format!(
        "memory warehouse cannot run raw statement: {}",
        sql
    )))
}

impl Connection for MemoryConnection {
    fn execute(&mut self, statement: &Statement) -> OrmResult<Box<dyn Cursor>> {
        self.check_open()?;
        if statement.is_dml() {
            self.execute_update(statement)?;
            return Ok(Box::new(MemoryCursor::new(
                ResultSet::default(),
                self.warehouse.stats.clone(),
            )));
        }
        self.record(statement);
        let result = self.run_select(statement)?;
        Ok(Box::new(MemoryCursor::new(result, self.warehouse.stats.clone())))
    }

    fn execute_update(&mut self, statement: &Statement) -> OrmResult<u64> {
        self.check_open()?;
        self.record(statement);
        let mut state = self.warehouse.state.lock();
        let (table, filter) = match statement {
            Statement::Update { table, filter, .. } | Statement::Delete { table, filter } => {
                (table, filter.as_ref())
            }
            _ => return Err(OrmError::warehouse("not a DML statement")),
        };

        let (key, matched, updates) = {
            let evaluator = Evaluator::new(&state.tables, self.default_dataset.as_deref());
            let key = evaluator.table_key(table)?;
            let matched = evaluator.matching_rows(table, filter)?;
            let mut updates = Vec::new();
            if let Statement::Update { assignments, .. } = statement {
                let source = &state.tables[&key];
                for &index in &matched {
                    let row = &source.rows[index];
                    let values = assignments
                        .iter()
                        .map(|(field, expr)| {
                            let schema = source.schema.field(field).ok_or_else(|| {
                                OrmError::warehouse(format!("Unrecognized name: {}", field))
                            })?;
                            let value = evaluator.eval_on_row(table, row, expr)?;
                            let value = coerce(schema, value).map_err(OrmError::warehouse)?;
                            Ok((field.clone(), value))
                        })
                        .collect::<OrmResult<Vec<_>>>()?;
                    updates.push((index, values));
                }
            }
            (key, matched, updates)
        };

        let target = state
            .tables
            .get_mut(&key)
            .ok_or(OrmError::TableNotFound { table: key.clone() })?;
        match statement {
            Statement::Delete { .. } => {
                let mut index = 0;
                target.rows.retain(|_| {
                    let keep = !matched.contains(&index);
                    index += 1;
                    keep
                });
            }
            _ => {
                for (index, values) in updates {
                    target.rows[index].extend(values);
                }
            }
        }
        Ok(matched.len() as u64)
    }

    fn rollback(&mut self) -> OrmResult<()> {
        self.warehouse.stats.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> OrmResult<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryCursor {
    description: Vec<ColumnDescription>,
    rows: VecDeque<Row>,
    stats: Arc<Stats>,
    closed: bool,
}

impl MemoryCursor {
    fn new(result: ResultSet, stats: Arc<Stats>) -> Self {
        stats.open_cursors.fetch_add(1, Ordering::SeqCst);
        Self {
            description: result.labels.into_iter().map(ColumnDescription::new).collect(),
            rows: result.rows.into(),
            stats,
            closed: false,
        }
    }
}

impl Cursor for MemoryCursor {
    fn description(&self) -> &[ColumnDescription] {
        &self.description
    }

    fn fetch_many(&mut self, size: usize) -> OrmResult<Vec<Row>> {
        if self.closed {
            return Err(OrmError::warehouse("cursor is closed"));
        }
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);
        let n = size.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }

    fn fetch_all(&mut self) -> OrmResult<Vec<Row>> {
        if self.closed {
            return Err(OrmError::warehouse("cursor is closed"));
        }
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.drain(..).collect())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}
