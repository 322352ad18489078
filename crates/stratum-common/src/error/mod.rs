//! Error handling for Stratum.
//!
//! This module provides the unified error type and result alias used
//! across all Stratum components.

mod orm;

pub use orm::{ErrorCode, OrmError};

/// Result type alias for Stratum operations.
pub type OrmResult<T> = std::result::Result<T, OrmError>;
