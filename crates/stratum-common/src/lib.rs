//! # stratum-common
//!
//! Common types, errors, and configuration for Stratum.
//!
//! This crate provides the foundational pieces shared by every Stratum
//! component:
//!
//! - **Errors**: the unified [`OrmError`] taxonomy and [`OrmResult`] alias
//! - **Config**: [`WarehouseConfig`], loadable from TOML
//! - **Constants**: reserved names, wire formats and limits
//!
//! ## Example
//!
//! ```rust
//! use stratum_common::{OrmError, OrmResult, WarehouseConfig};
//!
//! fn example() -> OrmResult<()> {
//!     let config = WarehouseConfig::new("my-project").default_dataset("analytics");
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;

pub use config::WarehouseConfig;
pub use constants::*;
pub use error::{ErrorCode, OrmError, OrmResult};
