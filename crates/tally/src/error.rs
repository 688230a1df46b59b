use thiserror::Error;

/// Errors from a backend adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend unreachable or refused the connection
    #[error("connect failed: {0}")]
    Connect(String),

    /// Tally query failed for a single poll tick
    #[error("query failed: {0}")]
    Query(String),

    /// Malformed envelope or payload from the REST proxy
    #[error("protocol error: {0}")]
    Protocol(String),

    /// REST proxy answered with something other than 200
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Backend could not be built from its configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors from the connection establisher.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EstablishError {
    #[error("gave up after {attempts} attempts: {last_error}")]
    GivenUp {
        attempts: u32,
        last_error: BackendError,
    },

    #[error("cancelled while connecting")]
    Cancelled,
}
