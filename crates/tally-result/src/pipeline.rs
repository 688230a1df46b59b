//! Startup wiring: build the configured backend, establish the connection,
//! then poll until shutdown.

use std::time::Duration;

use tally::metrics::TallyMetrics;
use tally::{Backend, BackendError, EstablishError, Establisher, Hub, PollStats, Poller};
use tally::{PostgresBackend, RestBackend};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{BackendConfig, Settings};

/// Poller tuning taken from [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Option<Duration>,
    pub fetch_timeout: Duration,
}

impl From<&Settings> for PollOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            interval: settings.poll_interval,
            fetch_timeout: settings.fetch_timeout,
        }
    }
}

/// Establish, then poll until `shutdown` fires.
///
/// Returns `None` when the connection was never established.
pub async fn run_pipeline<B: Backend>(
    backend: B,
    establisher: Establisher,
    hub: Hub,
    options: PollOptions,
    shutdown: CancellationToken,
) -> Option<PollStats> {
    let metrics = TallyMetrics::new(backend.name());
    let establisher = establisher.with_metrics(metrics.clone());

    let handle = match establisher.establish(&backend, &shutdown).await {
        Ok(handle) => handle,
        Err(EstablishError::Cancelled) => {
            info!(backend = backend.name(), "shutdown before database was reachable");
            return None;
        }
        Err(e) => {
            error!(backend = backend.name(), error = %e, "no database connection, viewers will not receive scores");
            return None;
        }
    };

    let mut poller = Poller::new(backend, handle, hub)
        .with_fetch_timeout(options.fetch_timeout)
        .with_metrics(metrics);
    if let Some(interval) = options.interval {
        poller = poller.with_interval(interval);
    }

    Some(poller.run(shutdown).await)
}

/// Build the adapter for `settings.backend` and start its pipeline.
///
/// Construction errors (bad URL, invalid schema, missing driver support)
/// surface here, before the HTTP server starts.
pub fn spawn(
    settings: &Settings,
    establisher: Establisher,
    hub: Hub,
    shutdown: CancellationToken,
) -> Result<JoinHandle<Option<PollStats>>, BackendError> {
    let options = PollOptions::from(settings);

    match &settings.backend {
        BackendConfig::Postgres { connect_string } => {
            let backend = PostgresBackend::new(connect_string.expose())?;
            Ok(tokio::spawn(run_pipeline(
                backend,
                establisher,
                hub,
                options,
                shutdown,
            )))
        }
        BackendConfig::Db2Rest {
            api_url,
            user,
            password,
        } => {
            let backend = RestBackend::new(api_url.as_str(), user, password.expose())?;
            Ok(tokio::spawn(run_pipeline(
                backend,
                establisher,
                hub,
                options,
                shutdown,
            )))
        }
        #[cfg(feature = "odbc")]
        BackendConfig::Db2Odbc {
            driver,
            database,
            hostname,
            port,
            protocol,
            schema,
            user,
            password,
        } => {
            use tally::backend::odbc::OdbcManager;
            use tally::backend::db2_connection_string;
            use tally::ManagedBackend;

            let conn_str = db2_connection_string(
                driver,
                database,
                hostname,
                *port,
                user,
                password.expose(),
                protocol,
            );
            let backend = ManagedBackend::new("db2-odbc", OdbcManager::new(conn_str), schema, 4)?;
            Ok(tokio::spawn(run_pipeline(
                backend,
                establisher,
                hub,
                options,
                shutdown,
            )))
        }
        #[cfg(not(feature = "odbc"))]
        BackendConfig::Db2Odbc { .. } => Err(BackendError::Config(
            "DB2 over ODBC needs a build with the `odbc` feature".into(),
        )),
    }
}
