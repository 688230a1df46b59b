use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::{Manager, Object, Pool};
use tokio::sync::Mutex;

use super::{Backend, SQL_POLL_INTERVAL};
use crate::error::BackendError;
use crate::tally::RawResult;

const MAX_IDENTIFIER_LEN: usize = 128;

/// A blocking SQL connection able to run the tally query.
///
/// Implemented by driver connections that have no async API (ODBC). Calls are
/// made from a blocking thread.
pub trait TallyQuery: Send + 'static {
    fn query_tally(&mut self, sql: &str) -> Result<RawResult, BackendError>;
}

/// Check that a schema name is a plain SQL identifier.
///
/// The schema is interpolated into the query text, so anything beyond
/// letters, digits and underscores is refused.
pub fn validate_schema(schema: &str) -> Result<&str, BackendError> {
    let mut chars = schema.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && schema.len() <= MAX_IDENTIFIER_LEN {
        Ok(schema)
    } else {
        Err(BackendError::Config(format!(
            "invalid schema name {:?}: expected [A-Za-z_][A-Za-z0-9_]*",
            schema
        )))
    }
}

/// Build the CLI connection string understood by the IBM DB2 driver.
pub fn db2_connection_string(
    driver: &str,
    database: &str,
    hostname: &str,
    port: u16,
    user: &str,
    password: &str,
    protocol: &str,
) -> String {
    format!(
        "DRIVER={{{}}};DATABASE={};HOSTNAME={};PORT={};UID={};PWD={};PROTOCOL={}",
        driver, database, hostname, port, user, password, protocol
    )
}

/// Pooled connection checked out by [`ManagedBackend::connect`].
///
/// The lock is held by the blocking query task, not by the awaiting future,
/// so a query abandoned on timeout keeps the connection busy until the driver
/// returns.
pub struct ManagedHandle<M: Manager>(Arc<Mutex<Object<M>>>);

/// Relational backend over a managed pool of blocking connections.
///
/// Reads `<schema>.votes`, so several teams can share one database.
pub struct ManagedBackend<M: Manager> {
    name: &'static str,
    pool: Pool<M>,
    select: String,
}

impl<M> ManagedBackend<M>
where
    M: Manager + 'static,
    M::Type: TallyQuery,
{
    /// `name` labels logs and metrics, e.g. `db2-odbc`.
    pub fn new(
        name: &'static str,
        manager: M,
        schema: &str,
        max_size: usize,
    ) -> Result<Self, BackendError> {
        let schema = validate_schema(schema)?;
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| BackendError::Config(format!("failed to create pool: {}", e)))?;

        Ok(Self {
            name,
            pool,
            select: format!(
                "SELECT vote, COUNT(id) AS count FROM {}.votes GROUP BY vote ORDER BY vote",
                schema
            ),
        })
    }

    /// The query text sent on every tick.
    pub fn select(&self) -> &str {
        &self.select
    }
}

#[async_trait]
impl<M> Backend for ManagedBackend<M>
where
    M: Manager + 'static,
    M::Type: TallyQuery,
    M::Error: Display,
{
    type Handle = ManagedHandle<M>;

    fn name(&self) -> &'static str {
        self.name
    }

    fn poll_interval(&self) -> Duration {
        SQL_POLL_INTERVAL
    }

    async fn connect(&self) -> Result<ManagedHandle<M>, BackendError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;
        Ok(ManagedHandle(Arc::new(Mutex::new(conn))))
    }

    async fn fetch_tally(&self, handle: &mut ManagedHandle<M>) -> Result<RawResult, BackendError> {
        let mut conn = Arc::clone(&handle.0)
            .try_lock_owned()
            .map_err(|_| BackendError::Query("previous query still running".into()))?;
        let sql = self.select.clone();

        tokio::task::spawn_blocking(move || conn.query_tally(&sql))
            .await
            .map_err(|e| BackendError::Query(format!("query task failed: {}", e)))?
    }
}
