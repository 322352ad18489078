//! Warehouse collaborator contracts.
//!
//! Everything the client needs from the remote warehouse goes through
//! [`WarehouseClient`]: table handles, streaming inserts, load and query
//! jobs, and statement connections. Jobs are polled through [`Job`] until
//! they reach a terminal state.

use std::fmt;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::trace;

use stratum_common::{OrmError, OrmResult};
use stratum_model::TableSchema;
use stratum_sql::{Connection, Statement};

/// A JSON row as sent to the streaming insert API.
pub type JsonRow = Map<String, JsonValue>;

// =============================================================================
// Table References
// =============================================================================

/// A fully resolved `dataset.table` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    /// Dataset name.
    pub dataset: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    /// Creates a reference.
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Resolves a model table identifier.
    ///
    /// `table` uses `default_dataset`; `dataset.table` is used as is. A
    /// project-qualified identifier is rejected: the project comes from the
    /// session configuration.
    pub fn resolve(identifier: &str, default_dataset: Option<&str>) -> OrmResult<Self> {
        let parts: Vec<&str> = identifier.split('.').collect();
        match parts.as_slice() {
            [table] if !table.is_empty() => {
                let dataset = default_dataset.ok_or_else(|| {
                    OrmError::validation(format!(
                        "table {} has no dataset and no default dataset is configured",
                        identifier
                    ))
                })?;
                Ok(Self::new(dataset, *table))
            }
            [dataset, table] if !dataset.is_empty() && !table.is_empty() => {
                Ok(Self::new(*dataset, *table))
            }
            _ => Err(OrmError::validation(format!(
                "invalid table identifier '{}': expected table or dataset.table",
                identifier
            ))),
        }
    }

    /// Returns `dataset.table`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Everything the create capability needs to create a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    /// Destination.
    pub table: TableRef,
    /// Fields and layout.
    pub schema: TableSchema,
    /// `CREATE TABLE` text for the same table.
    pub ddl: String,
}

// =============================================================================
// Job Configuration
// =============================================================================

/// Whether a job may create its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateDisposition {
    /// Create the destination if it is missing.
    CreateIfNeeded,
    /// Fail if the destination is missing.
    CreateNever,
}

/// How a job writes into an existing destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Append rows.
    WriteAppend,
    /// Replace the table contents.
    WriteTruncate,
    /// Fail unless the destination is empty.
    WriteEmpty,
}

/// Payload format of a load job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    /// One JSON object per line.
    NewlineDelimitedJson,
}

/// Configuration of a load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadJobConfig {
    /// Create disposition.
    pub create_disposition: CreateDisposition,
    /// Write disposition.
    pub write_disposition: WriteDisposition,
    /// Accept and drop fields missing from the destination schema.
    pub ignore_unknown_values: bool,
    /// Payload format.
    pub source_format: SourceFormat,
}

impl LoadJobConfig {
    /// Appends into an existing table and rejects unknown fields.
    pub fn append_only() -> Self {
        Self {
            create_disposition: CreateDisposition::CreateNever,
            write_disposition: WriteDisposition::WriteAppend,
            ignore_unknown_values: false,
            source_format: SourceFormat::NewlineDelimitedJson,
        }
    }
}

/// A query job writing its result into a table.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryJobRequest {
    /// Query to run.
    pub statement: Statement,
    /// Destination table.
    pub destination: TableRef,
    /// Create disposition.
    pub create_disposition: CreateDisposition,
    /// Write disposition.
    pub write_disposition: WriteDisposition,
    /// Flatten nested and repeated fields.
    pub flatten_results: bool,
    /// Allow results above the response size limit.
    pub allow_large_results: bool,
    /// Answer from the result cache when possible.
    pub use_query_cache: bool,
    /// Validate without running.
    pub dry_run: bool,
    /// Upper bound on bytes billed.
    pub maximum_bytes_billed: Option<u64>,
}

impl QueryJobRequest {
    /// Returns the query text with every parameter inlined.
    pub fn sql(&self) -> String {
        self.statement.build()
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Queued.
    Pending,
    /// Executing.
    Running,
    /// Terminal. Success is not implied.
    Done,
}

/// A submitted asynchronous job.
///
/// A job cannot be cancelled; it can only be polled until it is done.
pub trait Job {
    /// Returns the job identifier.
    fn job_id(&self) -> &str;

    /// Refreshes and returns the job state.
    fn poll(&mut self) -> OrmResult<JobState>;

    /// Returns the errors the job reported.
    fn errors(&self) -> &[JsonValue];

    /// Returns the fatal error, if the job failed.
    fn error_result(&self) -> Option<&JsonValue>;
}

/// Blocks until `job` is done, polling every `interval`.
pub fn wait_for_job(job: &mut dyn Job, interval: Duration) -> OrmResult<()> {
    loop {
        let state = job.poll()?;
        trace!(job_id = job.job_id(), ?state, "polled job");
        if state == JobState::Done {
            return Ok(());
        }
        thread::sleep(interval);
    }
}

// =============================================================================
// Client
// =============================================================================

/// The remote warehouse.
pub trait WarehouseClient: Send + Sync {
    /// Returns the live schema of a table.
    ///
    /// Fails with [`OrmError::TableNotFound`] if the table does not exist.
    fn get_table(&self, table: &TableRef) -> OrmResult<TableSchema>;

    /// Creates a table.
    fn create_table(&self, definition: &TableDefinition) -> OrmResult<()>;

    /// Drops a table.
    fn drop_table(&self, table: &TableRef) -> OrmResult<()>;

    /// Returns true if the table exists.
    fn table_exists(&self, table: &TableRef) -> OrmResult<bool>;

    /// Streams rows into a table and returns the row-level errors.
    fn insert_rows(&self, table: &TableRef, rows: &[JsonRow]) -> OrmResult<Vec<JsonValue>>;

    /// Submits a load job.
    fn submit_load_job(
        &self,
        payload: Bytes,
        destination: &TableRef,
        config: &LoadJobConfig,
    ) -> OrmResult<Box<dyn Job>>;

    /// Submits a query job.
    fn submit_query_job(&self, request: &QueryJobRequest) -> OrmResult<Box<dyn Job>>;

    /// Opens a statement connection.
    fn connect(&self, default_dataset: Option<&str>) -> OrmResult<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_table_ref() {
        assert_eq!(
            TableRef::resolve("people", Some("d")).unwrap(),
            TableRef::new("d", "people")
        );
        assert_eq!(
            TableRef::resolve("x.people", Some("d")).unwrap().id(),
            "x.people"
        );
        assert!(TableRef::resolve("people", None).is_err());
        assert!(TableRef::resolve("p.x.people", Some("d")).is_err());
        assert!(TableRef::resolve(".people", Some("d")).is_err());
    }

    #[test]
    fn test_load_config_serializes() {
        let json = serde_json::to_value(LoadJobConfig::append_only()).unwrap();
        assert_eq!(json["create_disposition"], "CREATE_NEVER");
        assert_eq!(json["write_disposition"], "WRITE_APPEND");
        assert_eq!(json["source_format"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(json["ignore_unknown_values"], false);
    }

    struct CountdownJob {
        remaining: usize,
    }

    impl Job for CountdownJob {
        fn job_id(&self) -> &str {
            "job-1"
        }
        fn poll(&mut self) -> OrmResult<JobState> {
            if self.remaining == 0 {
                return Ok(JobState::Done);
            }
            self.remaining -= 1;
            Ok(JobState::Running)
        }
        fn errors(&self) -> &[JsonValue] {
            &[]
        }
        fn error_result(&self) -> Option<&JsonValue> {
            None
        }
    }

    #[test]
    fn test_wait_for_job_polls_to_done() {
        let mut job = CountdownJob { remaining: 3 };
        wait_for_job(&mut job, Duration::from_millis(1)).unwrap();
        assert_eq!(job.remaining, 0);
    }
}
