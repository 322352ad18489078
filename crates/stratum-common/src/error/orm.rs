//! Error types for mapping, ingestion and query operations.

use std::fmt;

use thiserror::Error;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Bad caller input.
    Validation = 0x0001,
    /// Operation has no safe warehouse equivalent.
    UnsupportedOperation = 0x0002,
    /// No active unit of work.
    Scope = 0x0003,

    // Encoding errors (0x0100 - 0x01FF)
    /// Invalid or non-representable geometry.
    Geometry = 0x0100,
    /// A value could not be encoded for the warehouse.
    Serialization = 0x0101,
    /// A geometry column was requested but missing from a row.
    MissingGeometryField = 0x0102,

    // Warehouse errors (0x0200 - 0x02FF)
    /// Streaming insert or load job reported failures.
    Ingest = 0x0200,
    /// Remote I/O failure.
    Warehouse = 0x0201,
    /// Table does not exist.
    TableNotFound = 0x0202,

    // Query errors (0x0300 - 0x03FF)
    /// More rows than allowed by a single-result query.
    MultipleResults = 0x0300,
    /// No rows returned by a single-result query.
    NoResult = 0x0301,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Encoding",
            0x02 => "Warehouse",
            0x03 => "Query",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Stratum.
///
/// Every failure surfaces directly to the caller; nothing is retried or
/// downgraded. Warehouse-reported failures keep the raw payload so they can
/// be diagnosed without re-running the operation.
///
/// # Example
///
/// ```rust
/// use stratum_common::{OrmError, OrmResult};
///
/// fn batch_size(size: usize) -> OrmResult<usize> {
///     if size == 0 {
///         return Err(OrmError::validation("batch_size was 0"));
///     }
///     Ok(size)
/// }
/// ```
#[derive(Debug, Error)]
pub enum OrmError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Bad caller input.
    #[error("validation error: {message}")]
    Validation {
        /// Error message.
        message: String,
    },

    /// Operation known to have no safe warehouse equivalent.
    #[error("operation not supported: {operation}")]
    UnsupportedOperation {
        /// The rejected operation.
        operation: String,
    },

    /// No active unit of work.
    #[error("no active session: {message}")]
    Scope {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Encoding Errors
    // ==========================================================================
    /// Invalid geometry, or a geometry the warehouse cannot represent.
    #[error("invalid geometry: {message}")]
    Geometry {
        /// Error message.
        message: String,
    },

    /// A value could not be encoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The geometry column was requested but absent from a row.
    #[error("geometry field '{field}' missing from row")]
    MissingGeometryField {
        /// The missing field.
        field: String,
    },

    // ==========================================================================
    // Warehouse Errors
    // ==========================================================================
    /// Streaming insertion or a load job reported failures.
    #[error("ingest failed: {message}; errors: {errors:?}; error_result: {error_result:?}")]
    Ingest {
        /// Description of the failure.
        message: String,
        /// Row-level or job-level error list, as reported by the warehouse.
        errors: Vec<serde_json::Value>,
        /// Terminal job error, if any.
        error_result: Option<serde_json::Value>,
    },

    /// Remote I/O failure.
    #[error("warehouse error: {message}")]
    Warehouse {
        /// Error message.
        message: String,
    },

    /// Table not found.
    #[error("table '{table}' not found")]
    TableNotFound {
        /// The missing table.
        table: String,
    },

    // ==========================================================================
    // Query Errors
    // ==========================================================================
    /// More than one row returned where at most one was expected.
    #[error("multiple rows were found for a single-result query")]
    MultipleResults,

    /// No row returned where exactly one was expected.
    #[error("no row was found for a single-result query")]
    NoResult,
}

impl OrmError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::Validation,
            Self::UnsupportedOperation { .. } => ErrorCode::UnsupportedOperation,
            Self::Scope { .. } => ErrorCode::Scope,
            Self::Geometry { .. } => ErrorCode::Geometry,
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::MissingGeometryField { .. } => ErrorCode::MissingGeometryField,
            Self::Ingest { .. } => ErrorCode::Ingest,
            Self::Warehouse { .. } => ErrorCode::Warehouse,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::MultipleResults => ErrorCode::MultipleResults,
            Self::NoResult => ErrorCode::NoResult,
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Creates a scope error.
    #[must_use]
    pub fn scope(message: impl Into<String>) -> Self {
        Self::Scope {
            message: message.into(),
        }
    }

    /// Creates a geometry error.
    #[must_use]
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::Geometry {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an ingest error carrying the warehouse's error payload.
    #[must_use]
    pub fn ingest(
        message: impl Into<String>,
        errors: Vec<serde_json::Value>,
        error_result: Option<serde_json::Value>,
    ) -> Self {
        Self::Ingest {
            message: message.into(),
            errors,
            error_result,
        }
    }

    /// Creates a warehouse error.
    #[must_use]
    pub fn warehouse(message: impl Into<String>) -> Self {
        Self::Warehouse {
            message: message.into(),
        }
    }

    /// Returns the warehouse error list for ingest failures.
    #[must_use]
    pub fn ingest_errors(&self) -> Option<&[serde_json::Value]> {
        match self {
            Self::Ingest { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = OrmError::validation("bad batch size");
        assert_eq!(err.code(), ErrorCode::Validation);
        assert_eq!(err.code().category(), "General");

        let err = OrmError::ingest("load job failed", vec![], None);
        assert_eq!(err.code().category(), "Warehouse");
        assert_eq!(OrmError::NoResult.code().category(), "Query");
    }

    #[test]
    fn test_error_display() {
        let err = OrmError::TableNotFound {
            table: "unittest.test".to_string(),
        };
        assert_eq!(err.to_string(), "table 'unittest.test' not found");

        let err = OrmError::unsupported("with_session");
        assert_eq!(err.to_string(), "operation not supported: with_session");
    }

    #[test]
    fn test_ingest_error_keeps_payload() {
        let err = OrmError::ingest(
            "row errors",
            vec![serde_json::json!({"index": 0, "reason": "invalid"})],
            Some(serde_json::json!({"reason": "notFound"})),
        );
        assert_eq!(err.ingest_errors().map(<[_]>::len), Some(1));
        assert!(err.to_string().contains("notFound"));
        assert!(OrmError::NoResult.ingest_errors().is_none());
    }

    #[test]
    fn test_json_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: OrmError = json_err.into();
        assert_eq!(err.code(), ErrorCode::Serialization);
    }
}
