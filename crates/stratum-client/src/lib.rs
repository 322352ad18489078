//! # stratum-client
//!
//! Sessions, ingestion and query execution against an analytical warehouse.
//!
//! - **Warehouse**: the [`WarehouseClient`] contract and job polling
//! - **Sessions**: [`Database`], [`Session`] and [`SessionScope`]
//! - **Ingestion**: [`IngestDispatcher`] with streaming and load-job strategies
//! - **Queries**: [`QueryFacade`], which executes plans and materializes rows
//! - **Tables**: create, drop and inspect model tables; append query results
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum_client::{Database, IngestStrategy};
//!
//! let db = Database::new(config, client)?;
//! db.with_session(|session| {
//!     session.table_create(&person)?;
//!     session.ingest().insert(IngestStrategy::Streaming, &person, &people)?;
//!     let adults = session
//!         .query(&person)
//!         .filter(col(&person, "age")?.ge(18))?
//!         .all()?;
//!     println!("{} adults", adults.len());
//!     Ok(())
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod facade;
pub mod ingest;
pub mod session;
pub mod tables;
pub mod warehouse;

pub use facade::{
    Capability, Invoked, LabeledTuple, Operation, QueryFacade, ResultRow, ResultValue, Rows,
    UnsupportedOp,
};
pub use ingest::{to_ndjson, IngestDispatcher, IngestStrategy};
pub use session::{Database, Session, SessionScope};
pub use warehouse::{
    wait_for_job, CreateDisposition, Job, JobState, JsonRow, LoadJobConfig, QueryJobRequest,
    SourceFormat, TableDefinition, TableRef, WarehouseClient, WriteDisposition,
};
