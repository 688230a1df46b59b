//! Backend adapters: one data-access strategy per supported store.

mod managed;
#[cfg(feature = "odbc")]
pub mod odbc;
mod postgres;
mod rest;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::tally::RawResult;

pub use managed::{db2_connection_string, validate_schema, ManagedBackend, ManagedHandle, TallyQuery};
pub use postgres::{create_pool, PostgresBackend};
pub use rest::{parse_envelope, RestBackend};

/// Poll cadence for the relational backends.
pub const SQL_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// Poll cadence for the REST proxy.
pub const REST_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Aggregate vote count per option, ordered by option.
pub const TALLY_QUERY: &str = "SELECT vote, COUNT(id) AS count FROM votes GROUP BY vote ORDER BY vote";

/// A store the tally can be read from.
///
/// `connect` turns the backend into a usable handle; the handle is then owned
/// by the poller and passed back into every `fetch_tally` call.
#[async_trait]
pub trait Backend: Send + Sync {
    type Handle: Send;

    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Default cadence between two fetches.
    fn poll_interval(&self) -> Duration;

    /// Obtain a connection handle. May fail while the store is starting up.
    async fn connect(&self) -> Result<Self::Handle, BackendError>;

    /// Read the current tally rows.
    async fn fetch_tally(&self, handle: &mut Self::Handle) -> Result<RawResult, BackendError>;
}
