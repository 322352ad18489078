//! Ingestion of model instances.
//!
//! Two strategies push serialized rows into a model's table:
//!
//! - **streaming**: batched calls to the streaming insert API, each batch
//!   widened to the table's live schema
//! - **load job**: one newline-delimited JSON load job, waited on until it
//!   reaches a terminal state
//!
//! Neither strategy deduplicates or retries. Import adapters only parse; the
//! `create_from_*` helpers pair a parse with an explicit strategy.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use stratum_common::{OrmError, OrmResult};
use stratum_model::{
    parse_from_frame, parse_from_geojson, serialize, wire_row_to_json, Frame, GeoJsonImport,
    Instance, Model,
};

use crate::session::Session;
use crate::warehouse::{wait_for_job, Job, JsonRow, LoadJobConfig, TableRef, WarehouseClient};

/// How instances reach the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStrategy {
    /// Streaming inserts.
    Streaming,
    /// A load job.
    LoadJob,
}

impl IngestStrategy {
    /// Returns the strategy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStrategy::Streaming => "streaming",
            IngestStrategy::LoadJob => "load_job",
        }
    }
}

impl fmt::Display for IngestStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestStrategy {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streaming" => Ok(IngestStrategy::Streaming),
            "load_job" => Ok(IngestStrategy::LoadJob),
            other => Err(OrmError::validation(format!(
                "unknown ingest strategy '{}', expected streaming or load_job",
                other
            ))),
        }
    }
}

/// Serializes instances to a newline-delimited JSON payload.
pub fn to_ndjson(instances: &[Instance]) -> OrmResult<Bytes> {
    let mut lines = Vec::with_capacity(instances.len());
    for instance in instances {
        let row = wire_row_to_json(&serialize(instance, &[])?)?;
        lines.push(serde_json::to_string(&row)?);
    }
    Ok(Bytes::from(lines.join("\n")))
}

fn check_models(model: &Model, instances: &[Instance]) -> OrmResult<()> {
    match instances.iter().find(|i| i.model() != model) {
        Some(stray) => Err(OrmError::validation(format!(
            "cannot ingest {} instance into {}",
            stray.model().name(),
            model.name()
        ))),
        None => Ok(()),
    }
}

/// Dispatches instances to an ingest strategy.
pub struct IngestDispatcher<'s> {
    session: &'s Session,
}

impl<'s> IngestDispatcher<'s> {
    /// Creates a dispatcher for `session`.
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Ingests with the strategy named `strategy`.
    pub fn dispatch(&self, strategy: &str, model: &Model, instances: &[Instance]) -> OrmResult<()> {
        self.insert(strategy.parse()?, model, instances)
    }

    /// Ingests with `strategy`, using the configured streaming batch size.
    pub fn insert(
        &self,
        strategy: IngestStrategy,
        model: &Model,
        instances: &[Instance],
    ) -> OrmResult<()> {
        match strategy {
            IngestStrategy::Streaming => {
                self.stream(model, instances, self.session.config().streaming_batch_size)
            }
            IngestStrategy::LoadJob => self.load(model, instances),
        }
    }

    /// Streams instances in batches of `batch_size` rows.
    ///
    /// Each batch re-reads the table's live schema, so this works on a table
    /// created moments earlier. Any row-level error fails the call with an
    /// ingest error carrying the warehouse's error list; earlier batches stay
    /// inserted.
    pub fn stream(
        &self,
        model: &Model,
        instances: &[Instance],
        batch_size: Option<usize>,
    ) -> OrmResult<()> {
        if batch_size == Some(0) {
            return Err(OrmError::validation("batch_size must be at least 1"));
        }
        self.session.ensure_active()?;
        check_models(model, instances)?;
        if instances.is_empty() {
            return Ok(());
        }

        let client = self.session.client()?;
        let table = self.session.table_ref(model)?;
        let batch_size = batch_size.unwrap_or(instances.len());

        for (index, batch) in instances.chunks(batch_size).enumerate() {
            let template = null_template(client, &table)?;
            let rows = batch
                .iter()
                .map(|instance| {
                    let mut row = template.clone();
                    row.extend(wire_row_to_json(&serialize(instance, &[])?)?);
                    Ok(row)
                })
                .collect::<OrmResult<Vec<JsonRow>>>()?;

            debug!(table = %table, batch = index, rows = rows.len(), "streaming batch");
            let errors = client.insert_rows(&table, &rows)?;
            if !errors.is_empty() {
                warn!(table = %table, batch = index, errors = errors.len(), "streaming insert rejected rows");
                return Err(OrmError::ingest(
                    format!("streaming insert into {} reported {} row errors", table, errors.len()),
                    errors,
                    None,
                ));
            }
        }
        Ok(())
    }

    /// Loads instances with one load job and waits for it to finish.
    ///
    /// The job appends into an existing table and rejects unknown fields. A
    /// local failure while preparing or waiting, a job error result and a
    /// non-empty job error list all fail with an ingest error carrying the
    /// job's error detail.
    pub fn load(&self, model: &Model, instances: &[Instance]) -> OrmResult<()> {
        self.session.ensure_active()?;
        check_models(model, instances)?;
        if instances.is_empty() {
            return Ok(());
        }

        let client = self.session.client()?;
        let table = self.session.table_ref(model)?;

        let mut job: Option<Box<dyn Job>> = None;
        let outcome = self.run_load_job(client, &table, instances, &mut job);
        let (errors, error_result) = job
            .as_ref()
            .map(|j| (j.errors().to_vec(), j.error_result().cloned()))
            .unwrap_or_default();

        if let Err(e) = outcome {
            warn!(table = %table, error = %e, "load job failed locally");
            return Err(OrmError::ingest(
                format!("load job into {} failed: {}", table, e),
                errors,
                error_result,
            ));
        }
        if error_result.is_some() || !errors.is_empty() {
            warn!(table = %table, errors = errors.len(), "load job reported errors");
            return Err(OrmError::ingest(
                format!("load job into {} reported errors", table),
                errors,
                error_result,
            ));
        }

        info!(table = %table, rows = instances.len(), "load job completed");
        Ok(())
    }

    fn run_load_job(
        &self,
        client: &dyn WarehouseClient,
        table: &TableRef,
        instances: &[Instance],
        job: &mut Option<Box<dyn Job>>,
    ) -> OrmResult<()> {
        let payload = to_ndjson(instances)?;
        let submitted = job.insert(client.submit_load_job(
            payload,
            table,
            &LoadJobConfig::append_only(),
        )?);
        info!(table = %table, job_id = submitted.job_id(), rows = instances.len(), "load job submitted");
        wait_for_job(submitted.as_mut(), self.session.config().job_poll_interval)
    }

    /// Parses a frame, then ingests the instances.
    pub fn create_from_frame(
        &self,
        model: &Model,
        frame: &Frame,
        relabel: &HashMap<String, String>,
        strategy: IngestStrategy,
    ) -> OrmResult<Vec<Instance>> {
        let instances = parse_from_frame(model, frame, relabel)?;
        self.insert(strategy, model, &instances)?;
        Ok(instances)
    }

    /// Parses a feature collection, then ingests the instances.
    pub fn create_from_geojson(
        &self,
        model: &Model,
        collection: &JsonValue,
        import: &GeoJsonImport,
        strategy: IngestStrategy,
    ) -> OrmResult<Vec<Instance>> {
        let instances = parse_from_geojson(model, collection, import)?;
        self.insert(strategy, model, &instances)?;
        Ok(instances)
    }
}

/// A row with every live schema field set to null.
fn null_template(client: &dyn WarehouseClient, table: &TableRef) -> OrmResult<JsonRow> {
    let schema = client.get_table(table)?;
    Ok(schema
        .field_names()
        .map(|name| (name.to_string(), JsonValue::Null))
        .collect::<Map<_, _>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_model::{Column, ColumnType};

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("streaming".parse::<IngestStrategy>().unwrap(), IngestStrategy::Streaming);
        assert_eq!("load_job".parse::<IngestStrategy>().unwrap(), IngestStrategy::LoadJob);
        let err = "bulk".parse::<IngestStrategy>().unwrap_err();
        assert!(matches!(err, OrmError::Validation { .. }));
        assert_eq!(IngestStrategy::LoadJob.to_string(), "load_job");
    }

    #[test]
    fn test_to_ndjson() {
        let model = Model::builder("Row", "d.rows")
            .column(Column::new("id", ColumnType::Integer).required().default(1))
            .column(Column::new("name", ColumnType::String { max_length: None }))
            .build()
            .unwrap();
        let rows = vec![
            Instance::new(&model).with("name", "a").unwrap(),
            Instance::new(&model).with("id", 2).unwrap(),
        ];
        let payload = to_ndjson(&rows).unwrap();
        assert_eq!(
            std::str::from_utf8(&payload).unwrap(),
            "{\"id\":1,\"name\":\"a\"}\n{\"id\":2,\"name\":null}"
        );
    }

    #[test]
    fn test_check_models() {
        let a = Model::builder("A", "d.a")
            .column(Column::new("x", ColumnType::Integer))
            .build()
            .unwrap();
        let b = Model::builder("B", "d.b")
            .column(Column::new("x", ColumnType::Integer))
            .build()
            .unwrap();
        assert!(check_models(&a, &[Instance::new(&a)]).is_ok());
        assert!(check_models(&a, &[Instance::new(&a), Instance::new(&b)]).is_err());
    }
}
