//! Table lifecycle and query-to-table jobs.

use tracing::{info, warn};

use stratum_common::{OrmError, OrmResult};
use stratum_model::{Model, TableSchema};
use stratum_sql::{QueryPlan, Statement};

use crate::facade::QueryFacade;
use crate::session::Session;
use crate::warehouse::{
    wait_for_job, CreateDisposition, Job, QueryJobRequest, TableDefinition, TableRef,
    WriteDisposition,
};

impl Session {
    /// Creates the table for `model`, with its partitioning and clustering.
    pub fn table_create(&self, model: &Model) -> OrmResult<TableRef> {
        let table = self.table_ref(model)?;
        let definition = TableDefinition {
            schema: model.table_schema(),
            ddl: model.create_table_ddl(&table.id()),
            table: table.clone(),
        };
        self.client()?.create_table(&definition)?;
        info!(table = %table, model = model.name(), "table created");
        Ok(table)
    }

    /// Drops the table for `model`.
    pub fn table_delete(&self, model: &Model) -> OrmResult<()> {
        let table = self.table_ref(model)?;
        self.client()?.drop_table(&table)?;
        info!(table = %table, "table dropped");
        Ok(())
    }

    /// Returns true if the table for `model` exists.
    pub fn table_exists(&self, model: &Model) -> OrmResult<bool> {
        let table = self.table_ref(model)?;
        self.client()?.table_exists(&table)
    }

    /// Returns the live schema of the table for `model`.
    pub fn table_get(&self, model: &Model) -> OrmResult<TableSchema> {
        let table = self.table_ref(model)?;
        self.client()?.get_table(&table)
    }

    /// Appends the result of `query` into the existing table for `model`.
    ///
    /// The destination must exist. With `flatten_results` unset, large
    /// results are allowed. Job errors are reported as an ingest error.
    pub fn create_from_query<P: QueryPlan>(
        &self,
        model: &Model,
        query: &QueryFacade<'_, P>,
        flatten_results: bool,
    ) -> OrmResult<()> {
        let client = self.client()?;
        let destination = self.table_ref(model)?;
        let config = self.config();
        let request = QueryJobRequest {
            statement: Statement::Select(query.plan().statement()?),
            destination: destination.clone(),
            create_disposition: CreateDisposition::CreateNever,
            write_disposition: WriteDisposition::WriteAppend,
            flatten_results,
            allow_large_results: !flatten_results,
            use_query_cache: config.use_query_cache,
            dry_run: config.dry_run,
            maximum_bytes_billed: config.maximum_bytes_billed,
        };

        let mut job: Option<Box<dyn Job>> = None;
        let outcome = client.submit_query_job(&request).and_then(|submitted| {
            let submitted = job.insert(submitted);
            info!(table = %destination, job_id = submitted.job_id(), "query job submitted");
            wait_for_job(submitted.as_mut(), config.job_poll_interval)
        });
        let (errors, error_result) = job
            .as_ref()
            .map(|j| (j.errors().to_vec(), j.error_result().cloned()))
            .unwrap_or_default();

        if let Err(e) = outcome {
            warn!(table = %destination, error = %e, "query job failed locally");
            return Err(OrmError::ingest(
                format!("query job into {} failed: {}", destination, e),
                errors,
                error_result,
            ));
        }
        if error_result.is_some() || !errors.is_empty() {
            warn!(table = %destination, errors = errors.len(), "query job reported errors");
            return Err(OrmError::ingest(
                format!("query job into {} reported errors", destination),
                errors,
                error_result,
            ));
        }
        info!(table = %destination, "query job completed");
        Ok(())
    }
}
