//! Units of work.
//!
//! A [`Session`] owns one warehouse connection for one logical unit of work.
//! It is released deterministically: [`Database::with_session`] and
//! [`SessionScope::run`] roll back on failure or panic before closing, and
//! dropping a session closes it. A closed session fails every operation with a scope
//! error.
//!
//! Sessions are not shared between threads. Each thread opens its own.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use stratum_common::{OrmError, OrmResult, WarehouseConfig};
use stratum_model::Model;
use stratum_sql::{Connection, QueryPlan, SelectQuery};

use crate::facade::QueryFacade;
use crate::ingest::IngestDispatcher;
use crate::warehouse::{TableRef, WarehouseClient};

// =============================================================================
// Database
// =============================================================================

/// A configured warehouse handle that opens sessions.
#[derive(Clone)]
pub struct Database {
    config: WarehouseConfig,
    client: Arc<dyn WarehouseClient>,
}

impl Database {
    /// Creates a handle after validating `config`.
    pub fn new(config: WarehouseConfig, client: Arc<dyn WarehouseClient>) -> OrmResult<Self> {
        config.validate()?;
        Ok(Self { config, client })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Opens a session. The caller is responsible for closing it.
    pub fn session(&self) -> OrmResult<Session> {
        let connection = self.client.connect(self.config.default_dataset.as_deref())?;
        debug!(url = %self.config.connection_string(), "session opened");
        Ok(Session {
            config: self.config.clone(),
            client: self.client.clone(),
            connection: RefCell::new(Some(connection)),
        })
    }

    /// Runs `f` in a fresh session.
    ///
    /// The session is rolled back if `f` fails or panics and closed either
    /// way.
    pub fn with_session<T, F>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(&Session) -> OrmResult<T>,
    {
        let session = self.session()?;
        SessionScope::new().run(session, |scope| f(scope.current()?))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish()
    }
}

fn finish<T>(session: Session, result: OrmResult<T>) -> OrmResult<T> {
    match result {
        Ok(value) => {
            session.close()?;
            Ok(value)
        }
        Err(e) => {
            warn!(error = %e, "unit of work failed, rolling back");
            abort(&session);
            Err(e)
        }
    }
}

fn abort(session: &Session) {
    if let Err(rollback) = session.rollback() {
        warn!(error = %rollback, "rollback failed");
    }
    if let Err(close) = session.close() {
        warn!(error = %close, "close failed");
    }
}

// =============================================================================
// Session
// =============================================================================

/// One unit of work against the warehouse.
pub struct Session {
    config: WarehouseConfig,
    client: Arc<dyn WarehouseClient>,
    connection: RefCell<Option<Box<dyn Connection>>>,
}

impl Session {
    /// Returns the configuration.
    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Returns true until the session is closed.
    pub fn is_active(&self) -> bool {
        self.connection.borrow().is_some()
    }

    /// Fails with a scope error once the session is closed.
    pub fn ensure_active(&self) -> OrmResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(OrmError::scope("session is closed"))
        }
    }

    /// Returns the warehouse client.
    pub fn client(&self) -> OrmResult<&dyn WarehouseClient> {
        self.ensure_active()?;
        Ok(self.client.as_ref())
    }

    /// Runs `f` with the session's connection.
    pub fn with_connection<T, F>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce(&mut dyn Connection) -> OrmResult<T>,
    {
        let mut guard = self.connection.borrow_mut();
        let connection = guard
            .as_mut()
            .ok_or_else(|| OrmError::scope("session is closed"))?;
        f(connection.as_mut())
    }

    /// Resolves a model's table against the default dataset.
    pub fn table_ref(&self, model: &Model) -> OrmResult<TableRef> {
        TableRef::resolve(model.table(), self.config.default_dataset.as_deref())
    }

    /// Starts a query over every column of `model`.
    pub fn query(&self, model: &Model) -> QueryFacade<'_, SelectQuery> {
        QueryFacade::new(self, SelectQuery::entity(model))
    }

    /// Wraps an arbitrary plan.
    pub fn query_plan<P: QueryPlan>(&self, plan: P) -> QueryFacade<'_, P> {
        QueryFacade::new(self, plan)
    }

    /// Returns the ingest dispatcher for this session.
    pub fn ingest(&self) -> IngestDispatcher<'_> {
        IngestDispatcher::new(self)
    }

    /// Rolls back the active unit of work.
    pub fn rollback(&self) -> OrmResult<()> {
        debug!("session rollback");
        self.with_connection(|conn| conn.rollback())
    }

    /// Releases the connection. Closing twice is a no-op.
    pub fn close(&self) -> OrmResult<()> {
        match self.connection.borrow_mut().take() {
            Some(mut connection) => {
                debug!("session closed");
                connection.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close session on drop");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("project", &self.config.project)
            .field("active", &self.is_active())
            .finish()
    }
}

// =============================================================================
// Session Scope
// =============================================================================

/// An explicit stack of sessions for one thread of work.
///
/// Sessions enter and leave only through [`run`](SessionScope::run), so the
/// stack is always balanced.
#[derive(Debug, Default)]
pub struct SessionScope {
    stack: Vec<Session>,
}

impl SessionScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the innermost session.
    ///
    /// Fails with a scope error when no session has been entered.
    pub fn current(&self) -> OrmResult<&Session> {
        self.stack
            .last()
            .ok_or_else(|| OrmError::scope("no session has been entered in this scope"))
    }

    /// Returns the number of entered sessions.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Enters `session`, runs `f`, then leaves it.
    ///
    /// The session is rolled back if `f` fails or panics and closed either
    /// way.
    pub fn run<T, F>(&mut self, session: Session, f: F) -> OrmResult<T>
    where
        F: FnOnce(&mut SessionScope) -> OrmResult<T>,
    {
        self.stack.push(session);
        let mut entered = Entered {
            depth: self.stack.len(),
            scope: self,
            finished: false,
        };
        let result = f(entered.scope);
        entered.finished = true;
        match entered.scope.stack.pop() {
            Some(session) => finish(session, result),
            None => result,
        }
    }
}

/// Leaves the entered session if `run` unwinds before finishing.
struct Entered<'a> {
    scope: &'a mut SessionScope,
    depth: usize,
    finished: bool,
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        while self.scope.stack.len() >= self.depth {
            let Some(session) = self.scope.stack.pop() else {
                break;
            };
            warn!("unit of work aborted, rolling back");
            abort(&session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use serde_json::Value as JsonValue;
    use stratum_model::TableSchema;
    use stratum_sql::{Cursor, Statement};

    use crate::warehouse::{Job, JsonRow, LoadJobConfig, QueryJobRequest, TableDefinition};

    #[derive(Default)]
    struct Counters {
        rollbacks: AtomicUsize,
        closes: AtomicUsize,
    }

    struct CountingConnection(Arc<Counters>);

    impl Connection for CountingConnection {
        fn execute(&mut self, _: &Statement) -> OrmResult<Box<dyn Cursor>> {
            Err(OrmError::warehouse("not supported"))
        }
        fn execute_update(&mut self, _: &Statement) -> OrmResult<u64> {
            Ok(0)
        }
        fn rollback(&mut self) -> OrmResult<()> {
            self.0.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&mut self) -> OrmResult<()> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ConnectOnly(Arc<Counters>);

    impl WarehouseClient for ConnectOnly {
        fn get_table(&self, table: &TableRef) -> OrmResult<TableSchema> {
            Err(OrmError::TableNotFound { table: table.id() })
        }
        fn create_table(&self, _: &TableDefinition) -> OrmResult<()> {
            Ok(())
        }
        fn drop_table(&self, _: &TableRef) -> OrmResult<()> {
            Ok(())
        }
        fn table_exists(&self, _: &TableRef) -> OrmResult<bool> {
            Ok(false)
        }
        fn insert_rows(&self, _: &TableRef, _: &[JsonRow]) -> OrmResult<Vec<JsonValue>> {
            Ok(Vec::new())
        }
        fn submit_load_job(&self, _: Bytes, _: &TableRef, _: &LoadJobConfig) -> OrmResult<Box<dyn Job>> {
            Err(OrmError::warehouse("not supported"))
        }
        fn submit_query_job(&self, _: &QueryJobRequest) -> OrmResult<Box<dyn Job>> {
            Err(OrmError::warehouse("not supported"))
        }
        fn connect(&self, _: Option<&str>) -> OrmResult<Box<dyn Connection>> {
            Ok(Box::new(CountingConnection(self.0.clone())))
        }
    }

    fn database() -> (Database, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let db = Database::new(
            WarehouseConfig::for_testing(),
            Arc::new(ConnectOnly(counters.clone())),
        )
        .unwrap();
        (db, counters)
    }

    #[test]
    fn test_with_session_rolls_back_on_error() {
        let (db, counters) = database();
        db.with_session(|_| Ok(())).unwrap();
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 0);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

        let err = db
            .with_session(|_| -> OrmResult<()> { Err(OrmError::validation("boom")) })
            .unwrap_err();
        assert!(matches!(err, OrmError::Validation { .. }));
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_session_is_out_of_scope() {
        let (db, counters) = database();
        let session = db.session().unwrap();
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(session.ensure_active(), Err(OrmError::Scope { .. })));
        assert!(matches!(session.rollback(), Err(OrmError::Scope { .. })));
    }

    #[test]
    fn test_drop_closes_session() {
        let (db, counters) = database();
        drop(db.session().unwrap());
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scope_push_pop() {
        let (db, counters) = database();
        let mut scope = SessionScope::new();
        assert!(matches!(scope.current(), Err(OrmError::Scope { .. })));

        let depth = scope
            .run(db.session().unwrap(), |scope| {
                scope.current()?;
                let inner = db.session()?;
                scope.run(inner, |scope| Ok(scope.depth()))
            })
            .unwrap();
        assert_eq!(depth, 2);
        assert_eq!(scope.depth(), 0);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);

        let result: OrmResult<()> = scope.run(db.session().unwrap(), |_| {
            Err(OrmError::validation("fail"))
        });
        assert!(result.is_err());
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
        assert!(scope.current().is_err());
    }

    #[test]
    fn test_panic_rolls_back_before_close() {
        let (db, counters) = database();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            db.with_session(|_| -> OrmResult<()> { panic!("unit of work blew up") })
        }));
        assert!(outcome.is_err());
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

        let mut scope = SessionScope::new();
        let outer = db.session().unwrap();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            scope.run(outer, |scope| {
                let inner = db.session()?;
                scope.run(inner, |_| -> OrmResult<()> { panic!("nested failure") })
            })
        }));
        assert!(outcome.is_err());
        assert_eq!(scope.depth(), 0);
        assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 3);
    }
}
