//! Configuration structures for Stratum.

mod warehouse;

pub use warehouse::WarehouseConfig;
