//! # stratum-test
//!
//! Test support and integration tests for Stratum.
//!
//! This crate contains:
//! - [`MemoryWarehouse`], an in-process warehouse with tables, streaming
//!   inserts, polled load and query jobs, and statement connections
//! - a statement evaluator backing the memory warehouse's connections
//! - [`init_tracing`] and shared model fixtures for the integration tests

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;

use stratum_client::{Database, WarehouseClient};
use stratum_common::{OrmResult, WarehouseConfig};

/// Statement evaluation over in-memory tables.
pub mod eval;

/// Model fixtures shared by the integration tests.
pub mod fixtures;

/// The in-memory warehouse.
pub mod warehouse;

pub use warehouse::{MemoryWarehouse, Stats};

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per process.
///
/// The filter comes from `RUST_LOG`, defaulting to `stratum=debug`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("stratum_client=debug,stratum_sql=debug,stratum_test=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Opens a database over a fresh memory warehouse with the test config.
pub fn memory_database() -> OrmResult<(Database, MemoryWarehouse)> {
    memory_database_with(WarehouseConfig::for_testing())
}

/// Opens a database over a fresh memory warehouse.
pub fn memory_database_with(config: WarehouseConfig) -> OrmResult<(Database, MemoryWarehouse)> {
    init_tracing();
    let warehouse = MemoryWarehouse::new();
    let client: Arc<dyn WarehouseClient> = Arc::new(warehouse.clone());
    Ok((Database::new(config, client)?, warehouse))
}
