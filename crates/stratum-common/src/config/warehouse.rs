//! Warehouse connection and job configuration.
//!
//! A [`WarehouseConfig`] describes which project and dataset a session talks
//! to and the options forwarded to every job it submits.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_JOB_POLL_INTERVAL_MS, URL_SCHEME};
use crate::error::{OrmError, OrmResult};

/// Configuration for a warehouse session.
///
/// # Example
///
/// ```rust
/// use stratum_common::config::WarehouseConfig;
///
/// let config = WarehouseConfig::new("some-project")
///     .default_dataset("some-dataset")
///     .page_size(1000);
/// assert_eq!(
///     config.connection_string(),
///     "bigquery://some-project/some-dataset?arraysize=1000"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Project that owns the datasets and is billed for jobs.
    pub project: String,

    /// Dataset used for table identifiers without a dataset qualifier.
    pub default_dataset: Option<String>,

    /// Processing location for jobs.
    pub location: Option<String>,

    /// Default number of rows fetched per cursor page.
    /// Default: None (fetch all rows in one call)
    pub page_size: Option<usize>,

    /// Default batch size for streaming ingestion.
    /// Default: None (one batch)
    pub streaming_batch_size: Option<usize>,

    /// How often a blocking job wait polls the job state.
    /// Default: 500ms
    #[serde(with = "humantime_serde")]
    pub job_poll_interval: Duration,

    /// Labels attached to submitted jobs.
    pub labels: BTreeMap<String, String>,

    /// Whether queries may be answered from the result cache.
    /// Default: true
    pub use_query_cache: bool,

    /// Validate queries without running them.
    /// Default: false
    pub dry_run: bool,

    /// Upper bound on bytes billed per query job.
    pub maximum_bytes_billed: Option<u64>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            default_dataset: None,
            location: None,
            page_size: None,
            streaming_batch_size: None,
            job_poll_interval: Duration::from_millis(DEFAULT_JOB_POLL_INTERVAL_MS),
            labels: BTreeMap::new(),
            use_query_cache: true,
            dry_run: false,
            maximum_bytes_billed: None,
        }
    }
}

impl WarehouseConfig {
    /// Creates a configuration for the given project.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    /// Creates a configuration for testing against an in-memory warehouse.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            project: "unittest-project".to_string(),
            default_dataset: Some("unittest".to_string()),
            job_poll_interval: Duration::from_millis(1), // Faster tests
            ..Default::default()
        }
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> OrmResult<Self> {
        toml::from_str(text).map_err(|e| OrmError::validation(format!("invalid config: {}", e)))
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> OrmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrmError::validation(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Sets the default dataset.
    #[must_use]
    pub fn default_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.default_dataset = Some(dataset.into());
        self
    }

    /// Sets the job location.
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the default cursor page size.
    #[must_use]
    pub fn page_size(mut self, rows: usize) -> Self {
        self.page_size = Some(rows);
        self
    }

    /// Sets the default streaming batch size.
    #[must_use]
    pub fn streaming_batch_size(mut self, rows: usize) -> Self {
        self.streaming_batch_size = Some(rows);
        self
    }

    /// Sets the job poll interval.
    #[must_use]
    pub fn job_poll_interval(mut self, interval: Duration) -> Self {
        self.job_poll_interval = interval;
        self
    }

    /// Adds a job label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Sets the maximum bytes billed per query.
    #[must_use]
    pub fn maximum_bytes_billed(mut self, bytes: u64) -> Self {
        self.maximum_bytes_billed = Some(bytes);
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OrmResult<()> {
        if self.project.is_empty() {
            return Err(OrmError::validation("project must not be empty"));
        }

        if self.page_size == Some(0) {
            return Err(OrmError::validation("page_size must be at least 1"));
        }

        if self.streaming_batch_size == Some(0) {
            return Err(OrmError::validation(
                "streaming_batch_size must be at least 1",
            ));
        }

        if self.job_poll_interval.is_zero() {
            return Err(OrmError::validation("job_poll_interval must be non-zero"));
        }

        Ok(())
    }

    /// Renders the connection URL for this configuration.
    ///
    /// Only options that differ from their defaults are appended as query
    /// parameters.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let mut url = format!(
            "{}://{}/{}",
            URL_SCHEME,
            self.project,
            self.default_dataset.as_deref().unwrap_or_default()
        );

        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(location) = &self.location {
            params.push(("location", location.clone()));
        }
        if let Some(page_size) = self.page_size {
            params.push(("arraysize", page_size.to_string()));
        }
        if self.dry_run {
            params.push(("dry_run", "true".to_string()));
        }
        if !self.labels.is_empty() {
            let labels: Vec<String> = self
                .labels
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect();
            params.push(("labels", labels.join(",")));
        }
        if let Some(bytes) = self.maximum_bytes_billed {
            params.push(("maximum_bytes_billed", bytes.to_string()));
        }
        if !self.use_query_cache {
            params.push(("use_query_cache", "false".to_string()));
        }

        if !params.is_empty() {
            let query: Vec<String> = params
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = WarehouseConfig::default();
        assert_eq!(config.job_poll_interval, Duration::from_millis(500));
        assert!(config.use_query_cache);
        // Project is required
        assert!(config.validate().is_err());
        assert!(WarehouseConfig::new("p").validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = WarehouseConfig::new("p").page_size(0);
        assert!(config.validate().is_err());

        let config = WarehouseConfig::new("p").streaming_batch_size(0);
        assert!(config.validate().is_err());

        let config = WarehouseConfig::new("p").job_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connection_string() {
        let config = WarehouseConfig::new("some-project").default_dataset("some-dataset");
        assert_eq!(
            config.connection_string(),
            "bigquery://some-project/some-dataset"
        );

        let config = config
            .location("EU")
            .page_size(1000)
            .dry_run(true)
            .label("a", "b")
            .label("c", "d")
            .maximum_bytes_billed(1000);
        assert_eq!(
            config.connection_string(),
            "bigquery://some-project/some-dataset?location=EU&arraysize=1000\
             &dry_run=true&labels=a:b,c:d&maximum_bytes_billed=1000"
        );
    }

    #[test]
    fn test_from_toml() {
        let config = WarehouseConfig::from_toml_str(
            r#"
            project = "p"
            default_dataset = "d"
            page_size = 50
            job_poll_interval = "2s"

            [labels]
            team = "geo"
            "#,
        )
        .unwrap();
        assert_eq!(config.project, "p");
        assert_eq!(config.page_size, Some(50));
        assert_eq!(config.job_poll_interval, Duration::from_secs(2));
        assert_eq!(config.labels.get("team").map(String::as_str), Some("geo"));
        assert!(config.use_query_cache);

        assert!(WarehouseConfig::from_toml_str("page_size = \"x\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project = \"from-file\"").unwrap();
        writeln!(file, "streaming_batch_size = 500").unwrap();

        let config = WarehouseConfig::load(file.path()).unwrap();
        assert_eq!(config.project, "from-file");
        assert_eq!(config.streaming_batch_size, Some(500));
        assert!(WarehouseConfig::load("/nonexistent/stratum.toml").is_err());
    }

    #[test]
    fn test_testing_config() {
        let config = WarehouseConfig::for_testing();
        assert_eq!(config.default_dataset.as_deref(), Some("unittest"));
        assert!(config.validate().is_ok());
    }
}
