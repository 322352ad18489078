//! System-wide constants for Stratum.

// =============================================================================
// Naming Constants
// =============================================================================

/// URL scheme of warehouse connection strings.
pub const URL_SCHEME: &str = "bigquery";

/// Column name reserved by the warehouse for its ingestion-time pseudo column.
///
/// Declaring a column with this name is rejected.
pub const RESERVED_COLUMN_NAME: &str = "_PARTITIONTIME";

// =============================================================================
// Wire Format Constants
// =============================================================================

/// Timestamp wire format, accurate to microseconds.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Date wire format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Table Layout Limits
// =============================================================================

/// Number of partition columns a table may declare.
pub const PARTITION_FIELDS: usize = 1;

/// Maximum number of clustering columns.
pub const MAX_CLUSTER_FIELDS: usize = 4;

// =============================================================================
// Job Constants
// =============================================================================

/// Default job poll interval in milliseconds.
pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 500;

// =============================================================================
// Display Limits
// =============================================================================

/// Maximum number of properties shown when displaying an instance.
pub const DISPLAY_MAX_PROPERTIES: usize = 50;

/// Maximum characters per property value when displaying an instance.
pub const DISPLAY_MAX_VALUE_CHARS: usize = 60;
