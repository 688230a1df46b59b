//! DB2 connections over ODBC for [`ManagedBackend`](super::ManagedBackend).

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use odbc_api::{force_send_sync, Connection, ConnectionOptions, Cursor, Environment};
use once_cell::sync::OnceCell;

use super::TallyQuery;
use crate::error::BackendError;
use crate::tally::{RawResult, RawRow};

static ENVIRONMENT: OnceCell<Environment> = OnceCell::new();

fn environment() -> Result<&'static Environment, BackendError> {
    ENVIRONMENT
        .get_or_try_init(Environment::new)
        .map_err(|e| BackendError::Connect(format!("ODBC environment: {}", e)))
}

/// One open DB2 connection, movable to the blocking query thread.
pub struct Db2Connection(force_send_sync::Send<Connection<'static>>);

impl TallyQuery for Db2Connection {
    fn query_tally(&mut self, sql: &str) -> Result<RawResult, BackendError> {
        let query_err = |e: odbc_api::Error| BackendError::Query(e.to_string());

        let mut rows = Vec::new();
        let Some(mut cursor) = self.0.execute(sql, (), None).map_err(query_err)? else {
            return Ok(rows);
        };

        let mut vote_buf = Vec::new();
        let mut count_buf = Vec::new();
        while let Some(mut row) = cursor.next_row().map_err(query_err)? {
            let has_vote = row.get_text(1, &mut vote_buf).map_err(query_err)?;
            row.get_text(2, &mut count_buf).map_err(query_err)?;
            if !has_vote {
                continue;
            }

            let vote = String::from_utf8_lossy(&vote_buf).trim().to_string();
            let count_text = String::from_utf8_lossy(&count_buf);
            let count = count_text.trim().parse::<u64>().map_err(|e| {
                BackendError::Query(format!("invalid count {:?} for {}: {}", count_text, vote, e))
            })?;
            rows.push(RawRow::new(vote, count));
        }
        Ok(rows)
    }
}

/// Pool manager opening DB2 connections from a CLI connection string.
pub struct OdbcManager {
    connection_string: String,
}

impl OdbcManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl Manager for OdbcManager {
    type Type = Db2Connection;
    type Error = BackendError;

    async fn create(&self) -> Result<Db2Connection, BackendError> {
        let conn_str = self.connection_string.clone();
        tokio::task::spawn_blocking(move || {
            let env = environment()?;
            let conn = env
                .connect_with_connection_string(&conn_str, ConnectionOptions::default())
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            // SAFETY: the DB2 CLI driver is thread safe, and the connection is
            // used by one thread at a time behind the handle's lock.
            Ok(Db2Connection(unsafe { conn.promote_to_send() }))
        })
        .await
        .map_err(|e| BackendError::Connect(format!("connect task failed: {}", e)))?
    }

    async fn recycle(&self, conn: &mut Db2Connection, _: &Metrics) -> RecycleResult<BackendError> {
        match conn.0.is_dead() {
            Ok(false) => Ok(()),
            Ok(true) => Err(RecycleError::Message("connection is dead".into())),
            Err(e) => Err(RecycleError::Backend(BackendError::Connect(e.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_connection_moves_to_blocking_thread() {
        assert_send::<Db2Connection>();
        assert_send::<deadpool::managed::Object<OdbcManager>>();
    }
}
